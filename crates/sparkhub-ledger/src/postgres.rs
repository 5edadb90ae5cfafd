use async_trait::async_trait;
use chrono::Utc;
use sparkhub_core::{
    Account, AccountReconciliation, DecisionOutcome, EntryKind, LedgerEntry, LedgerStore,
    NewAccount, NewNotification, NewProject, NewReconciliationRun, NewSubmission, Notification,
    OfferDraft, OfferFilter, PaymentSubmission, Posting, ProjectDecision, ProjectDecisionOutcome,
    ProjectFilter, ProjectStatus, ProjectVerdict, PurchaseOutcome, ReconciliationRun, Role,
    ServiceOffer, StoreError, SubmissionDecision, SubmissionFilter, SubmissionStatus,
    SubmissionVerdict, UploadedProject,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

/// Postgres-backed ledger store. Each mutating trait method opens one
/// transaction; the non-negative balance rule lives in the conditional
/// `UPDATE ... WHERE balance + delta >= 0` and is backed by a CHECK
/// constraint on the table.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct MappingError(String);

fn parse_role(raw: &str) -> Result<Role, StoreError> {
    Role::parse(raw).ok_or_else(|| StoreError::backend(MappingError(format!("unknown role {raw:?}"))))
}

fn parse_entry_kind(raw: &str) -> Result<EntryKind, StoreError> {
    EntryKind::parse(raw)
        .ok_or_else(|| StoreError::backend(MappingError(format!("unknown entry kind {raw:?}"))))
}

fn parse_project_status(raw: &str) -> Result<ProjectStatus, StoreError> {
    ProjectStatus::parse(raw)
        .ok_or_else(|| StoreError::backend(MappingError(format!("unknown project status {raw:?}"))))
}

fn parse_submission_status(raw: &str) -> Result<SubmissionStatus, StoreError> {
    SubmissionStatus::parse(raw).ok_or_else(|| {
        StoreError::backend(MappingError(format!("unknown submission status {raw:?}")))
    })
}

fn account_from_row(row: &PgRow) -> Result<Account, StoreError> {
    let role_raw: String = row.try_get("role").map_err(StoreError::backend)?;
    Ok(Account {
        id: row.try_get("id").map_err(StoreError::backend)?,
        display_name: row.try_get("display_name").map_err(StoreError::backend)?,
        email: row.try_get("email").map_err(StoreError::backend)?,
        role: parse_role(&role_raw)?,
        balance: row.try_get("balance").map_err(StoreError::backend)?,
        created_at: row.try_get("created_at").map_err(StoreError::backend)?,
        updated_at: row.try_get("updated_at").map_err(StoreError::backend)?,
    })
}

fn entry_from_row(row: &PgRow) -> Result<LedgerEntry, StoreError> {
    let kind_raw: String = row.try_get("kind").map_err(StoreError::backend)?;
    Ok(LedgerEntry {
        id: row.try_get("id").map_err(StoreError::backend)?,
        account_id: row.try_get("account_id").map_err(StoreError::backend)?,
        amount: row.try_get("amount").map_err(StoreError::backend)?,
        balance_after: row.try_get("balance_after").map_err(StoreError::backend)?,
        kind: parse_entry_kind(&kind_raw)?,
        description: row.try_get("description").map_err(StoreError::backend)?,
        created_at: row.try_get("created_at").map_err(StoreError::backend)?,
    })
}

fn offer_from_row(row: &PgRow) -> Result<ServiceOffer, StoreError> {
    Ok(ServiceOffer {
        id: row.try_get("id").map_err(StoreError::backend)?,
        name: row.try_get("name").map_err(StoreError::backend)?,
        description: row.try_get("description").map_err(StoreError::backend)?,
        cost_points: row.try_get("cost_points").map_err(StoreError::backend)?,
        discount_pct: row.try_get("discount_pct").map_err(StoreError::backend)?,
        per_unit: row.try_get("per_unit").map_err(StoreError::backend)?,
        active: row.try_get("active").map_err(StoreError::backend)?,
        available_from: row.try_get("available_from").map_err(StoreError::backend)?,
        available_until: row.try_get("available_until").map_err(StoreError::backend)?,
        created_at: row.try_get("created_at").map_err(StoreError::backend)?,
        updated_at: row.try_get("updated_at").map_err(StoreError::backend)?,
    })
}

fn project_from_row(row: &PgRow) -> Result<UploadedProject, StoreError> {
    let status_raw: String = row.try_get("status").map_err(StoreError::backend)?;
    Ok(UploadedProject {
        id: row.try_get("id").map_err(StoreError::backend)?,
        account_id: row.try_get("account_id").map_err(StoreError::backend)?,
        offer_id: row.try_get("offer_id").map_err(StoreError::backend)?,
        title: row.try_get("title").map_err(StoreError::backend)?,
        description: row.try_get("description").map_err(StoreError::backend)?,
        category: row.try_get("category").map_err(StoreError::backend)?,
        file_ref: row.try_get("file_ref").map_err(StoreError::backend)?,
        status: parse_project_status(&status_raw)?,
        price_points: row.try_get("price_points").map_err(StoreError::backend)?,
        expedite_days: row.try_get("expedite_days").map_err(StoreError::backend)?,
        decision_reason: row.try_get("decision_reason").map_err(StoreError::backend)?,
        created_at: row.try_get("created_at").map_err(StoreError::backend)?,
        updated_at: row.try_get("updated_at").map_err(StoreError::backend)?,
    })
}

fn submission_from_row(row: &PgRow) -> Result<PaymentSubmission, StoreError> {
    let status_raw: String = row.try_get("status").map_err(StoreError::backend)?;
    Ok(PaymentSubmission {
        id: row.try_get("id").map_err(StoreError::backend)?,
        account_id: row.try_get("account_id").map_err(StoreError::backend)?,
        amount: row.try_get("amount").map_err(StoreError::backend)?,
        currency: row.try_get("currency").map_err(StoreError::backend)?,
        method: row.try_get("method").map_err(StoreError::backend)?,
        tx_reference: row.try_get("tx_reference").map_err(StoreError::backend)?,
        status: parse_submission_status(&status_raw)?,
        credited_points: row.try_get("credited_points").map_err(StoreError::backend)?,
        decided_by: row.try_get("decided_by").map_err(StoreError::backend)?,
        decided_at: row.try_get("decided_at").map_err(StoreError::backend)?,
        decision_reason: row.try_get("decision_reason").map_err(StoreError::backend)?,
        created_at: row.try_get("created_at").map_err(StoreError::backend)?,
    })
}

fn notification_from_row(row: &PgRow) -> Result<Notification, StoreError> {
    Ok(Notification {
        id: row.try_get("id").map_err(StoreError::backend)?,
        account_id: row.try_get("account_id").map_err(StoreError::backend)?,
        title: row.try_get("title").map_err(StoreError::backend)?,
        body: row.try_get("body").map_err(StoreError::backend)?,
        created_at: row.try_get("created_at").map_err(StoreError::backend)?,
        delivered_at: row.try_get("delivered_at").map_err(StoreError::backend)?,
        read_at: row.try_get("read_at").map_err(StoreError::backend)?,
    })
}

fn reconciliation_from_row(row: &PgRow) -> Result<AccountReconciliation, StoreError> {
    Ok(AccountReconciliation {
        account_id: row.try_get("account_id").map_err(StoreError::backend)?,
        balance: row.try_get("balance").map_err(StoreError::backend)?,
        entry_total: row.try_get("entry_total").map_err(StoreError::backend)?,
    })
}

/// Conditional balance update, entry append and optional notification,
/// inside the caller's transaction. The `WHERE balance + $2 >= 0` clause is
/// what makes verify-and-debit a single step under concurrency.
async fn apply_posting(
    tx: &mut Transaction<'_, Postgres>,
    posting: &Posting,
) -> Result<LedgerEntry, StoreError> {
    let now = Utc::now();
    let updated = sqlx::query(
        r#"
        UPDATE accounts
        SET balance = balance + $2, updated_at = $3
        WHERE id = $1 AND balance + $2 >= 0
        RETURNING balance
        "#,
    )
    .bind(posting.account_id)
    .bind(posting.amount)
    .bind(now)
    .fetch_optional(&mut **tx)
    .await
    .map_err(StoreError::backend)?;

    let balance_after: i64 = match updated {
        Some(row) => row.try_get("balance").map_err(StoreError::backend)?,
        None => {
            let current = sqlx::query("SELECT balance FROM accounts WHERE id = $1")
                .bind(posting.account_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(StoreError::backend)?;
            return Err(match current {
                Some(row) => StoreError::InsufficientFunds {
                    balance: row.try_get("balance").map_err(StoreError::backend)?,
                    required: posting.amount.saturating_neg(),
                },
                None => StoreError::AccountNotFound(posting.account_id),
            });
        }
    };

    let entry_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO ledger_entries (id, account_id, amount, balance_after, kind, description, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(entry_id)
    .bind(posting.account_id)
    .bind(posting.amount)
    .bind(balance_after)
    .bind(posting.kind.as_str())
    .bind(&posting.description)
    .bind(now)
    .execute(&mut **tx)
    .await
    .map_err(StoreError::backend)?;

    if let Some(notify) = &posting.notify {
        insert_notification(tx, posting.account_id, notify).await?;
    }

    Ok(LedgerEntry {
        id: entry_id,
        account_id: posting.account_id,
        amount: posting.amount,
        balance_after,
        kind: posting.kind,
        description: posting.description.clone(),
        created_at: now,
    })
}

async fn insert_notification(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    notify: &NewNotification,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO notifications (id, account_id, title, body, created_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(account_id)
    .bind(&notify.title)
    .bind(&notify.body)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await
    .map_err(StoreError::backend)?;
    Ok(())
}

const ACCOUNT_COLUMNS: &str = "id, display_name, email, role, balance, created_at, updated_at";
const OFFER_COLUMNS: &str = "id, name, description, cost_points, discount_pct, per_unit, active, available_from, available_until, created_at, updated_at";
const PROJECT_COLUMNS: &str = "id, account_id, offer_id, title, description, category, file_ref, status, price_points, expedite_days, decision_reason, created_at, updated_at";
const SUBMISSION_COLUMNS: &str = "id, account_id, amount, currency, method, tx_reference, status, credited_points, decided_by, decided_at, decision_reason, created_at";

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn ensure_account(&self, account: NewAccount) -> Result<Account, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, display_name, email, role, balance, created_at, updated_at)
            VALUES ($1, $2, $3, 'user', 0, $4, $4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(account.id)
        .bind(&account.display_name)
        .bind(&account.email)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(account.id)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        account_from_row(&row)
    }

    async fn account(&self, account_id: Uuid) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn entries(&self, account_id: Uuid, limit: i64) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, amount, balance_after, kind, description, created_at
            FROM ledger_entries
            WHERE account_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn post(&self, posting: Posting) -> Result<LedgerEntry, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;
        let entry = apply_posting(&mut tx, &posting).await?;
        tx.commit().await.map_err(StoreError::backend)?;
        Ok(entry)
    }

    async fn post_purchase(
        &self,
        posting: Posting,
        project: NewProject,
    ) -> Result<PurchaseOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;
        let entry = apply_posting(&mut tx, &posting).await?;

        let now = Utc::now();
        let project_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO uploaded_projects (
                id, account_id, offer_id, title, description, category,
                file_ref, status, price_points, expedite_days, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $9, $10, $10)
            "#,
        )
        .bind(project_id)
        .bind(posting.account_id)
        .bind(project.offer_id)
        .bind(&project.title)
        .bind(&project.description)
        .bind(&project.category)
        .bind(&project.file_ref)
        .bind(project.price_points)
        .bind(project.expedite_days)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::backend)?;
        tx.commit().await.map_err(StoreError::backend)?;

        Ok(PurchaseOutcome {
            entry,
            project: UploadedProject {
                id: project_id,
                account_id: posting.account_id,
                offer_id: project.offer_id,
                title: project.title,
                description: project.description,
                category: project.category,
                file_ref: project.file_ref,
                status: ProjectStatus::Pending,
                price_points: project.price_points,
                expedite_days: project.expedite_days,
                decision_reason: None,
                created_at: now,
                updated_at: now,
            },
        })
    }

    async fn compensate_purchase(
        &self,
        project_id: Uuid,
        posting: Posting,
    ) -> Result<LedgerEntry, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;
        let updated = sqlx::query(
            r#"
            UPDATE uploaded_projects
            SET status = 'failed', updated_at = $2
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(project_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(StoreError::backend)?;

        if updated.rows_affected() == 0 {
            let row = sqlx::query("SELECT status FROM uploaded_projects WHERE id = $1")
                .bind(project_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(StoreError::backend)?;
            return Err(match row {
                Some(row) => StoreError::AlreadyDecided {
                    entity: "project",
                    id: project_id,
                    status: row.try_get("status").map_err(StoreError::backend)?,
                },
                None => StoreError::NotFound {
                    entity: "project",
                    id: project_id,
                },
            });
        }

        let entry = apply_posting(&mut tx, &posting).await?;
        tx.commit().await.map_err(StoreError::backend)?;
        Ok(entry)
    }

    async fn create_offer(&self, draft: OfferDraft) -> Result<ServiceOffer, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO service_offers (
                id, name, description, cost_points, discount_pct, per_unit,
                active, available_from, available_until, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            RETURNING {OFFER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&draft.name)
        .bind(&draft.description)
        .bind(draft.cost_points)
        .bind(draft.discount_pct)
        .bind(draft.per_unit)
        .bind(draft.active)
        .bind(draft.available_from)
        .bind(draft.available_until)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        offer_from_row(&row)
    }

    async fn update_offer(
        &self,
        offer_id: Uuid,
        draft: OfferDraft,
    ) -> Result<ServiceOffer, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE service_offers
            SET name = $2, description = $3, cost_points = $4, discount_pct = $5,
                per_unit = $6, active = $7, available_from = $8, available_until = $9,
                updated_at = $10
            WHERE id = $1
            RETURNING {OFFER_COLUMNS}
            "#
        ))
        .bind(offer_id)
        .bind(&draft.name)
        .bind(&draft.description)
        .bind(draft.cost_points)
        .bind(draft.discount_pct)
        .bind(draft.per_unit)
        .bind(draft.active)
        .bind(draft.available_from)
        .bind(draft.available_until)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        match row {
            Some(row) => offer_from_row(&row),
            None => Err(StoreError::NotFound {
                entity: "offer",
                id: offer_id,
            }),
        }
    }

    async fn retire_offer(&self, offer_id: Uuid) -> Result<ServiceOffer, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE service_offers
            SET active = FALSE, updated_at = $2
            WHERE id = $1
            RETURNING {OFFER_COLUMNS}
            "#
        ))
        .bind(offer_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        match row {
            Some(row) => offer_from_row(&row),
            None => Err(StoreError::NotFound {
                entity: "offer",
                id: offer_id,
            }),
        }
    }

    async fn offer(&self, offer_id: Uuid) -> Result<Option<ServiceOffer>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {OFFER_COLUMNS} FROM service_offers WHERE id = $1"
        ))
        .bind(offer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        row.as_ref().map(offer_from_row).transpose()
    }

    async fn offers(&self, filter: OfferFilter) -> Result<Vec<ServiceOffer>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {OFFER_COLUMNS}
            FROM service_offers
            WHERE $1::timestamptz IS NULL
               OR (active
                   AND (available_from IS NULL OR available_from <= $1)
                   AND (available_until IS NULL OR available_until >= $1))
            ORDER BY created_at DESC
            "#
        ))
        .bind(filter.only_available_at)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        rows.iter().map(offer_from_row).collect()
    }

    async fn project(&self, project_id: Uuid) -> Result<Option<UploadedProject>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PROJECT_COLUMNS} FROM uploaded_projects WHERE id = $1"
        ))
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        row.as_ref().map(project_from_row).transpose()
    }

    async fn projects(&self, filter: ProjectFilter) -> Result<Vec<UploadedProject>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PROJECT_COLUMNS}
            FROM uploaded_projects
            WHERE ($1::uuid IS NULL OR account_id = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#
        ))
        .bind(filter.account_id)
        .bind(filter.status.map(|status| status.as_str()))
        .bind(filter.limit.unwrap_or(100))
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        rows.iter().map(project_from_row).collect()
    }

    async fn decide_project(
        &self,
        project_id: Uuid,
        decision: ProjectDecision,
    ) -> Result<ProjectDecisionOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;
        let row = sqlx::query(&format!(
            "SELECT {PROJECT_COLUMNS} FROM uploaded_projects WHERE id = $1 FOR UPDATE"
        ))
        .bind(project_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(StoreError::backend)?;
        let mut project = match row {
            Some(row) => project_from_row(&row)?,
            None => {
                return Err(StoreError::NotFound {
                    entity: "project",
                    id: project_id,
                });
            }
        };
        if project.status != ProjectStatus::Pending {
            return Err(StoreError::AlreadyDecided {
                entity: "project",
                id: project_id,
                status: project.status.as_str().to_string(),
            });
        }

        let (next_status, refund_entry) = match decision.verdict {
            ProjectVerdict::Approved => (ProjectStatus::Approved, None),
            ProjectVerdict::Rejected { refund } => {
                let entry = match refund {
                    Some(posting) => Some(apply_posting(&mut tx, &posting).await?),
                    None => None,
                };
                (ProjectStatus::Rejected, entry)
            }
        };

        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE uploaded_projects
            SET status = $2, decision_reason = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(project_id)
        .bind(next_status.as_str())
        .bind(&decision.reason)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::backend)?;
        insert_notification(&mut tx, project.account_id, &decision.notify).await?;
        tx.commit().await.map_err(StoreError::backend)?;

        project.status = next_status;
        project.decision_reason = decision.reason;
        project.updated_at = now;
        Ok(ProjectDecisionOutcome {
            project,
            refund_entry,
        })
    }

    async fn create_submission(
        &self,
        submission: NewSubmission,
    ) -> Result<PaymentSubmission, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO payment_submissions (
                id, account_id, amount, currency, method, tx_reference, status, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'submitted', $7)
            RETURNING {SUBMISSION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(submission.account_id)
        .bind(submission.amount)
        .bind(&submission.currency)
        .bind(&submission.method)
        .bind(&submission.tx_reference)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            let duplicate = err.as_database_error().and_then(|db| db.constraint())
                == Some("payment_submissions_account_reference_key");
            if duplicate {
                StoreError::DuplicateReference {
                    account_id: submission.account_id,
                    reference: submission.tx_reference.clone(),
                }
            } else {
                StoreError::backend(err)
            }
        })?;
        submission_from_row(&row)
    }

    async fn submission(
        &self,
        submission_id: Uuid,
    ) -> Result<Option<PaymentSubmission>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SUBMISSION_COLUMNS} FROM payment_submissions WHERE id = $1"
        ))
        .bind(submission_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        row.as_ref().map(submission_from_row).transpose()
    }

    async fn submissions(
        &self,
        filter: SubmissionFilter,
    ) -> Result<Vec<PaymentSubmission>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SUBMISSION_COLUMNS}
            FROM payment_submissions
            WHERE ($1::uuid IS NULL OR account_id = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#
        ))
        .bind(filter.account_id)
        .bind(filter.status.map(|status| status.as_str()))
        .bind(filter.limit.unwrap_or(100))
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        rows.iter().map(submission_from_row).collect()
    }

    async fn decide_submission(
        &self,
        submission_id: Uuid,
        decision: SubmissionDecision,
    ) -> Result<DecisionOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;
        let row = sqlx::query(&format!(
            "SELECT {SUBMISSION_COLUMNS} FROM payment_submissions WHERE id = $1 FOR UPDATE"
        ))
        .bind(submission_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(StoreError::backend)?;
        let mut submission = match row {
            Some(row) => submission_from_row(&row)?,
            None => {
                return Err(StoreError::NotFound {
                    entity: "submission",
                    id: submission_id,
                });
            }
        };
        if submission.status != SubmissionStatus::Submitted {
            return Err(StoreError::AlreadyDecided {
                entity: "submission",
                id: submission_id,
                status: submission.status.as_str().to_string(),
            });
        }

        let now = Utc::now();
        let (next_status, reason, entry) = match decision.verdict {
            SubmissionVerdict::Verified { posting } => {
                let entry = apply_posting(&mut tx, &posting).await?;
                (SubmissionStatus::Verified, None, Some(entry))
            }
            SubmissionVerdict::Rejected { reason, notify } => {
                insert_notification(&mut tx, submission.account_id, &notify).await?;
                (SubmissionStatus::Rejected, Some(reason), None)
            }
        };

        sqlx::query(
            r#"
            UPDATE payment_submissions
            SET status = $2, credited_points = $3, decided_by = $4, decided_at = $5,
                decision_reason = $6
            WHERE id = $1
            "#,
        )
        .bind(submission_id)
        .bind(next_status.as_str())
        .bind(entry.as_ref().map(|entry| entry.amount))
        .bind(decision.decided_by)
        .bind(now)
        .bind(&reason)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::backend)?;
        tx.commit().await.map_err(StoreError::backend)?;

        submission.status = next_status;
        submission.credited_points = entry.as_ref().map(|entry| entry.amount);
        submission.decided_by = Some(decision.decided_by);
        submission.decided_at = Some(now);
        submission.decision_reason = reason;
        Ok(DecisionOutcome { submission, entry })
    }

    async fn set_role(&self, account_id: Uuid, role: Role) -> Result<Account, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE accounts
            SET role = $2, updated_at = $3
            WHERE id = $1
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(account_id)
        .bind(role.as_str())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        match row {
            Some(row) => account_from_row(&row),
            None => Err(StoreError::AccountNotFound(account_id)),
        }
    }

    async fn notifications(
        &self,
        account_id: Uuid,
        unread_only: bool,
    ) -> Result<Vec<Notification>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, title, body, created_at, delivered_at, read_at
            FROM notifications
            WHERE account_id = $1 AND (NOT $2 OR read_at IS NULL)
            ORDER BY created_at DESC
            LIMIT 100
            "#,
        )
        .bind(account_id)
        .bind(unread_only)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        rows.iter().map(notification_from_row).collect()
    }

    async fn mark_notification_read(
        &self,
        notification_id: Uuid,
        account_id: Uuid,
    ) -> Result<Notification, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE notifications
            SET read_at = COALESCE(read_at, $3)
            WHERE id = $1 AND account_id = $2
            RETURNING id, account_id, title, body, created_at, delivered_at, read_at
            "#,
        )
        .bind(notification_id)
        .bind(account_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        match row {
            Some(row) => notification_from_row(&row),
            None => Err(StoreError::NotFound {
                entity: "notification",
                id: notification_id,
            }),
        }
    }

    async fn mark_notifications_delivered(&self, account_id: Uuid) -> Result<u64, StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE notifications
            SET delivered_at = $2
            WHERE account_id = $1 AND delivered_at IS NULL
            "#,
        )
        .bind(account_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(updated.rows_affected())
    }

    async fn reconcile(&self, account_id: Uuid) -> Result<AccountReconciliation, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT a.id AS account_id, a.balance, COALESCE(SUM(e.amount), 0)::BIGINT AS entry_total
            FROM accounts a
            LEFT JOIN ledger_entries e ON e.account_id = a.id
            WHERE a.id = $1
            GROUP BY a.id, a.balance
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        match row {
            Some(row) => reconciliation_from_row(&row),
            None => Err(StoreError::AccountNotFound(account_id)),
        }
    }

    async fn reconcile_all(&self) -> Result<Vec<AccountReconciliation>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT a.id AS account_id, a.balance, COALESCE(SUM(e.amount), 0)::BIGINT AS entry_total
            FROM accounts a
            LEFT JOIN ledger_entries e ON e.account_id = a.id
            GROUP BY a.id, a.balance
            ORDER BY a.id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        rows.iter().map(reconciliation_from_row).collect()
    }

    async fn record_reconciliation_run(
        &self,
        run: NewReconciliationRun,
    ) -> Result<ReconciliationRun, StoreError> {
        let id = Uuid::new_v4();
        let run_at = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO reconciliation_runs (id, run_at, accounts_checked, drift_count, notes)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id)
        .bind(run_at)
        .bind(run.accounts_checked)
        .bind(run.drift_count)
        .bind(&run.notes)
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(ReconciliationRun {
            id,
            run_at,
            accounts_checked: run.accounts_checked,
            drift_count: run.drift_count,
            notes: run.notes,
        })
    }

    async fn reconciliation_runs(
        &self,
        limit: i64,
    ) -> Result<Vec<ReconciliationRun>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, run_at, accounts_checked, drift_count, notes
            FROM reconciliation_runs
            ORDER BY run_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        rows.iter()
            .map(|row| {
                Ok(ReconciliationRun {
                    id: row.try_get("id").map_err(StoreError::backend)?,
                    run_at: row.try_get("run_at").map_err(StoreError::backend)?,
                    accounts_checked: row.try_get("accounts_checked").map_err(StoreError::backend)?,
                    drift_count: row.try_get("drift_count").map_err(StoreError::backend)?,
                    notes: row.try_get("notes").map_err(StoreError::backend)?,
                })
            })
            .collect()
    }
}
