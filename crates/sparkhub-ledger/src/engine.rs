use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sparkhub_core::{
    Account, AccountReconciliation, DecisionOutcome, EntryKind, LedgerEntry, LedgerStore,
    NewAccount, NewNotification, NewProject, NewReconciliationRun, NewSubmission, Notification,
    OfferDraft, OfferFilter, PaymentSubmission, Posting, ProjectDecision, ProjectDecisionOutcome,
    ProjectFilter, ProjectVerdict, ReconciliationRun, Role, ServiceOffer, SubmissionDecision,
    SubmissionFilter, SubmissionStatus, SubmissionVerdict, UploadedProject,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::files::FileStore;
use crate::{pricing, tier};

/// Tunable limits for ledger operations.
#[derive(Debug, Clone)]
pub struct LedgerPolicy {
    /// Points charged per expedited review day on top of the upload price.
    pub expedite_fee_per_day: i64,
    /// Points charged for an upload that is not tied to a service offer.
    pub base_upload_fee: i64,
    /// Largest absolute adjustment a support admin may apply in one call.
    pub max_admin_adjustment: i64,
    /// Largest fiat amount accepted for a single top-up claim.
    pub max_topup_amount: Decimal,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            expedite_fee_per_day: 5,
            base_upload_fee: 10,
            max_admin_adjustment: 10_000,
            max_topup_amount: Decimal::from(1_000_000),
        }
    }
}

/// Proof that an account holds the admin role. Privileged operations take
/// this by reference, and the only way to obtain one is
/// [`Ledger::require_admin`], so the role check cannot be skipped.
#[derive(Debug, Clone)]
pub struct AdminActor {
    account_id: Uuid,
}

impl AdminActor {
    pub fn account_id(&self) -> Uuid {
        self.account_id
    }
}

#[derive(Debug, Clone)]
pub struct NewUpload {
    pub title: String,
    pub description: String,
    pub category: String,
    pub file_ref: String,
    pub offer_id: Option<Uuid>,
    pub units: Option<i64>,
    pub expedite_days: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct NewTopUp {
    pub amount: Decimal,
    pub currency: String,
    pub method: String,
    pub tx_reference: String,
}

/// Outcome of a successful purchase or upload: the debit entry and the
/// pending artifact it paid for.
#[derive(Debug, Clone)]
pub struct Receipt {
    pub entry: LedgerEntry,
    pub project: UploadedProject,
}

impl Receipt {
    pub fn cost(&self) -> i64 {
        -self.entry.amount
    }

    pub fn balance_after(&self) -> i64 {
        self.entry.balance_after
    }
}

/// Moderation ruling for a pending project.
#[derive(Debug, Clone)]
pub enum Ruling {
    Approve,
    Reject { reason: String, refund: bool },
}

/// The points ledger. Balance mutations go through the store, which applies
/// them atomically; this layer owns validation, pricing, the upload saga and
/// the notification copy.
pub struct Ledger<S, F> {
    store: Arc<S>,
    files: Arc<F>,
    policy: LedgerPolicy,
}

impl<S, F> Clone for Ledger<S, F> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            files: self.files.clone(),
            policy: self.policy.clone(),
        }
    }
}

fn required_field<'a>(value: &'a str, name: &'static str) -> Result<&'a str, LedgerError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::MissingField(name));
    }
    Ok(trimmed)
}

fn validate_offer(draft: &OfferDraft) -> Result<(), LedgerError> {
    if draft.name.trim().is_empty() {
        return Err(LedgerError::MissingField("name"));
    }
    if draft.cost_points < 1 {
        return Err(LedgerError::InvalidAmount("cost_points must be at least 1"));
    }
    if let Some(pct) = draft.discount_pct {
        if !(0..=100).contains(&pct) {
            return Err(LedgerError::InvalidAmount(
                "discount_pct must be between 0 and 100",
            ));
        }
    }
    if let (Some(from), Some(until)) = (draft.available_from, draft.available_until) {
        if from > until {
            return Err(LedgerError::InvalidWindow);
        }
    }
    Ok(())
}

impl<S, F> Ledger<S, F>
where
    S: LedgerStore,
    F: FileStore,
{
    pub fn new(store: Arc<S>, files: Arc<F>, policy: LedgerPolicy) -> Self {
        Self {
            store,
            files,
            policy,
        }
    }

    pub fn policy(&self) -> &LedgerPolicy {
        &self.policy
    }

    pub async fn ensure_account(&self, account: NewAccount) -> Result<Account, LedgerError> {
        let display_name = required_field(&account.display_name, "display_name")?.to_string();
        let email = required_field(&account.email, "email")?.to_string();
        Ok(self
            .store
            .ensure_account(NewAccount {
                id: account.id,
                display_name,
                email,
            })
            .await?)
    }

    pub async fn account(&self, account_id: Uuid) -> Result<Account, LedgerError> {
        self.store
            .account(account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(account_id))
    }

    /// Read-only affordability check. Unknown accounts are reported as
    /// unable to pay rather than as an error; the authoritative check is
    /// the conditional debit inside the store.
    pub async fn has_sufficient_balance(
        &self,
        account_id: Uuid,
        required: i64,
    ) -> Result<bool, LedgerError> {
        match self.store.account(account_id).await? {
            Some(account) => Ok(account.balance >= required),
            None => Ok(false),
        }
    }

    pub async fn history(
        &self,
        account_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let limit = limit.unwrap_or(50).clamp(1, 500);
        Ok(self.store.entries(account_id, limit).await?)
    }

    /// Append one entry and move the balance with it. Flows with richer
    /// semantics (purchases, top-ups, adjustments) layer on top of this.
    pub async fn post_entry(
        &self,
        account_id: Uuid,
        amount: i64,
        kind: EntryKind,
        description: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount("amount must be non-zero"));
        }
        let description = required_field(description, "description")?.to_string();
        Ok(self
            .store
            .post(Posting {
                account_id,
                amount,
                kind,
                description,
                notify: None,
            })
            .await?)
    }

    pub async fn offers(&self, filter: OfferFilter) -> Result<Vec<ServiceOffer>, LedgerError> {
        Ok(self.store.offers(filter).await?)
    }

    pub async fn offer(&self, offer_id: Uuid) -> Result<ServiceOffer, LedgerError> {
        self.store.offer(offer_id).await?.ok_or(LedgerError::NotFound {
            entity: "offer",
            id: offer_id,
        })
    }

    pub async fn create_offer(
        &self,
        actor: &AdminActor,
        draft: OfferDraft,
    ) -> Result<ServiceOffer, LedgerError> {
        validate_offer(&draft)?;
        let offer = self.store.create_offer(draft).await?;
        info!(admin = %actor.account_id, offer = %offer.id, "offer created");
        Ok(offer)
    }

    pub async fn update_offer(
        &self,
        actor: &AdminActor,
        offer_id: Uuid,
        draft: OfferDraft,
    ) -> Result<ServiceOffer, LedgerError> {
        validate_offer(&draft)?;
        let offer = self.store.update_offer(offer_id, draft).await?;
        info!(admin = %actor.account_id, offer = %offer.id, "offer updated");
        Ok(offer)
    }

    pub async fn retire_offer(
        &self,
        actor: &AdminActor,
        offer_id: Uuid,
    ) -> Result<ServiceOffer, LedgerError> {
        let offer = self.store.retire_offer(offer_id).await?;
        info!(admin = %actor.account_id, offer = %offer.id, "offer retired");
        Ok(offer)
    }

    /// Buy a service offer. The affordability check and the debit are one
    /// conditional write inside the store, so two concurrent purchases can
    /// never both succeed on a balance that covers only one.
    pub async fn purchase_offer(
        &self,
        account_id: Uuid,
        offer_id: Uuid,
        units: Option<i64>,
    ) -> Result<Receipt, LedgerError> {
        let units = units.unwrap_or(1);
        if units < 1 {
            return Err(LedgerError::InvalidAmount("units must be at least 1"));
        }
        let offer = self.offer(offer_id).await?;
        if !offer.available_at(Utc::now()) {
            return Err(LedgerError::OfferUnavailable { offer_id });
        }
        let cost = pricing::effective_cost(&offer, units);
        let outcome = self
            .store
            .post_purchase(
                Posting {
                    account_id,
                    amount: -cost,
                    kind: EntryKind::Spend,
                    description: format!("Purchased offer: {}", offer.name),
                    notify: Some(NewNotification {
                        title: "Purchase confirmed".to_string(),
                        body: format!("{cost} points were deducted for {}.", offer.name),
                    }),
                },
                NewProject {
                    offer_id: Some(offer.id),
                    title: offer.name.clone(),
                    description: offer.description.clone(),
                    category: "service".to_string(),
                    file_ref: None,
                    price_points: cost,
                    expedite_days: None,
                },
            )
            .await?;
        info!(account = %account_id, offer = %offer_id, cost, "offer purchased");
        Ok(Receipt {
            entry: outcome.entry,
            project: outcome.project,
        })
    }

    /// Upload a project: debit first, then promote the staged file. If
    /// promotion fails the debit is compensated with an equal credit and the
    /// artifact is marked failed, so a stored-but-unpaid or paid-but-unstored
    /// project cannot survive the call.
    pub async fn upload_project(
        &self,
        account_id: Uuid,
        upload: NewUpload,
    ) -> Result<Receipt, LedgerError> {
        let title = required_field(&upload.title, "title")?.to_string();
        let category = required_field(&upload.category, "category")?.to_string();
        let file_ref = required_field(&upload.file_ref, "file_ref")?.to_string();
        let units = upload.units.unwrap_or(1);
        if units < 1 {
            return Err(LedgerError::InvalidAmount("units must be at least 1"));
        }
        if let Some(days) = upload.expedite_days {
            if days < 1 {
                return Err(LedgerError::InvalidAmount("expedite_days must be at least 1"));
            }
        }

        let (offer_id, mut cost) = match upload.offer_id {
            Some(offer_id) => {
                let offer = self.offer(offer_id).await?;
                if !offer.available_at(Utc::now()) {
                    return Err(LedgerError::OfferUnavailable { offer_id });
                }
                (Some(offer.id), pricing::effective_cost(&offer, units))
            }
            None => (None, self.policy.base_upload_fee),
        };
        if let Some(days) = upload.expedite_days {
            // effective_cost saturates; the surcharge must not wrap past it.
            let surcharge = i64::from(days).saturating_mul(self.policy.expedite_fee_per_day);
            cost = cost.saturating_add(surcharge);
        }

        let outcome = self
            .store
            .post_purchase(
                Posting {
                    account_id,
                    amount: -cost,
                    kind: EntryKind::Spend,
                    description: format!("Project upload: {title}"),
                    notify: Some(NewNotification {
                        title: "Upload received".to_string(),
                        body: format!("{title} is awaiting review; {cost} points were deducted."),
                    }),
                },
                NewProject {
                    offer_id,
                    title: title.clone(),
                    description: upload.description.trim().to_string(),
                    category,
                    file_ref: Some(file_ref.clone()),
                    price_points: cost,
                    expedite_days: upload.expedite_days,
                },
            )
            .await?;

        if let Err(side_effect) = self.files.promote(&file_ref).await {
            warn!(
                project = %outcome.project.id,
                error = %side_effect,
                "file promotion failed, refunding the charge"
            );
            let refund = Posting {
                account_id,
                amount: cost,
                kind: EntryKind::Earn,
                description: format!("Refund: upload of {title} could not be stored"),
                notify: Some(NewNotification {
                    title: "Upload failed".to_string(),
                    body: format!("{title} could not be stored; {cost} points were returned."),
                }),
            };
            return Err(
                match self
                    .store
                    .compensate_purchase(outcome.project.id, refund)
                    .await
                {
                    Ok(_) => LedgerError::SideEffectFailed(side_effect),
                    Err(compensation) => {
                        error!(
                            project = %outcome.project.id,
                            error = %compensation,
                            "compensating credit failed, account left debited"
                        );
                        LedgerError::CompensationFailed {
                            side_effect,
                            compensation,
                        }
                    }
                },
            );
        }

        info!(account = %account_id, project = %outcome.project.id, cost, "project uploaded");
        Ok(Receipt {
            entry: outcome.entry,
            project: outcome.project,
        })
    }

    pub async fn projects(
        &self,
        filter: ProjectFilter,
    ) -> Result<Vec<UploadedProject>, LedgerError> {
        Ok(self.store.projects(filter).await?)
    }

    pub async fn project(&self, project_id: Uuid) -> Result<UploadedProject, LedgerError> {
        self.store
            .project(project_id)
            .await?
            .ok_or(LedgerError::NotFound {
                entity: "project",
                id: project_id,
            })
    }

    pub async fn decide_project(
        &self,
        actor: &AdminActor,
        project_id: Uuid,
        ruling: Ruling,
    ) -> Result<ProjectDecisionOutcome, LedgerError> {
        let project = self.project(project_id).await?;
        let decision = match ruling {
            Ruling::Approve => ProjectDecision {
                verdict: ProjectVerdict::Approved,
                reason: None,
                notify: NewNotification {
                    title: "Project approved".to_string(),
                    body: format!("{} is now live.", project.title),
                },
            },
            Ruling::Reject { reason, refund } => {
                let reason = reason.trim().to_string();
                if reason.is_empty() {
                    return Err(LedgerError::EmptyReason);
                }
                let refund_posting = (refund && project.price_points > 0).then(|| Posting {
                    account_id: project.account_id,
                    amount: project.price_points,
                    kind: EntryKind::Admin,
                    description: format!("Refund for rejected project: {}", project.title),
                    notify: None,
                });
                let body = if refund_posting.is_some() {
                    format!(
                        "{} was rejected: {reason}. The {} points you paid were returned.",
                        project.title, project.price_points
                    )
                } else {
                    format!("{} was rejected: {reason}.", project.title)
                };
                ProjectDecision {
                    verdict: ProjectVerdict::Rejected {
                        refund: refund_posting,
                    },
                    reason: Some(reason),
                    notify: NewNotification {
                        title: "Project rejected".to_string(),
                        body,
                    },
                }
            }
        };
        let outcome = self.store.decide_project(project_id, decision).await?;
        info!(
            admin = %actor.account_id,
            project = %project_id,
            status = outcome.project.status.as_str(),
            "project decided"
        );
        Ok(outcome)
    }

    /// Record a top-up claim. The claim is user-asserted and credits nothing
    /// until an admin verifies it.
    pub async fn submit_topup(
        &self,
        account_id: Uuid,
        topup: NewTopUp,
    ) -> Result<PaymentSubmission, LedgerError> {
        if topup.amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount("top-up amount must be positive"));
        }
        if topup.amount > self.policy.max_topup_amount {
            return Err(LedgerError::InvalidAmount(
                "top-up amount exceeds the supported maximum",
            ));
        }
        let currency = required_field(&topup.currency, "currency")?.to_uppercase();
        let method = required_field(&topup.method, "method")?.to_string();
        let tx_reference = required_field(&topup.tx_reference, "tx_reference")?.to_string();
        self.account(account_id).await?;
        let submission = self
            .store
            .create_submission(NewSubmission {
                account_id,
                amount: topup.amount,
                currency,
                method,
                tx_reference,
            })
            .await?;
        info!(
            account = %account_id,
            submission = %submission.id,
            amount = %submission.amount,
            "top-up submitted"
        );
        Ok(submission)
    }

    pub async fn topups(
        &self,
        filter: SubmissionFilter,
    ) -> Result<Vec<PaymentSubmission>, LedgerError> {
        Ok(self.store.submissions(filter).await?)
    }

    /// Verify a top-up: credit the tier-adjusted points and close the claim
    /// in one transaction. The store only honors the transition out of
    /// `submitted`, so a claim can be credited at most once.
    pub async fn verify_topup(
        &self,
        actor: &AdminActor,
        submission_id: Uuid,
    ) -> Result<DecisionOutcome, LedgerError> {
        let submission =
            self.store
                .submission(submission_id)
                .await?
                .ok_or(LedgerError::NotFound {
                    entity: "submission",
                    id: submission_id,
                })?;
        if submission.status != SubmissionStatus::Submitted {
            return Err(LedgerError::AlreadyDecided {
                entity: "submission",
                id: submission_id,
                status: submission.status.as_str().to_string(),
            });
        }
        let credited = tier::credited_points(submission.amount);
        let outcome = self
            .store
            .decide_submission(
                submission_id,
                SubmissionDecision {
                    decided_by: actor.account_id,
                    verdict: SubmissionVerdict::Verified {
                        posting: Posting {
                            account_id: submission.account_id,
                            amount: credited,
                            kind: EntryKind::Earn,
                            description: format!(
                                "Top-up verified: {} {}",
                                submission.amount, submission.currency
                            ),
                            notify: Some(NewNotification {
                                title: "Top-up verified".to_string(),
                                body: format!(
                                    "Your top-up of {} {} was verified and {credited} points were credited.",
                                    submission.amount, submission.currency
                                ),
                            }),
                        },
                    },
                },
            )
            .await?;
        info!(
            admin = %actor.account_id,
            submission = %submission_id,
            credited,
            "top-up verified"
        );
        Ok(outcome)
    }

    /// Reject a top-up. Touches no balance and no entries; only the claim
    /// status, the reason and a notification.
    pub async fn reject_topup(
        &self,
        actor: &AdminActor,
        submission_id: Uuid,
        reason: &str,
    ) -> Result<PaymentSubmission, LedgerError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(LedgerError::EmptyReason);
        }
        let outcome = self
            .store
            .decide_submission(
                submission_id,
                SubmissionDecision {
                    decided_by: actor.account_id,
                    verdict: SubmissionVerdict::Rejected {
                        reason: reason.to_string(),
                        notify: NewNotification {
                            title: "Top-up rejected".to_string(),
                            body: format!("Your top-up could not be verified: {reason}"),
                        },
                    },
                },
            )
            .await?;
        info!(admin = %actor.account_id, submission = %submission_id, "top-up rejected");
        Ok(outcome.submission)
    }

    /// Exchange an account id for an [`AdminActor`], or refuse.
    pub async fn require_admin(&self, account_id: Uuid) -> Result<AdminActor, LedgerError> {
        let account = self.account(account_id).await?;
        if account.role != Role::Admin {
            return Err(LedgerError::Unauthorized { account_id });
        }
        Ok(AdminActor { account_id })
    }

    /// Support correction of a balance, bounded by policy and always
    /// accompanied by a reason and a notification to the account holder.
    pub async fn admin_adjust(
        &self,
        actor: &AdminActor,
        target: Uuid,
        amount: i64,
        reason: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount("amount must be non-zero"));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(LedgerError::EmptyReason);
        }
        if amount.unsigned_abs() > self.policy.max_admin_adjustment.unsigned_abs() {
            return Err(LedgerError::AdjustmentTooLarge {
                amount,
                cap: self.policy.max_admin_adjustment,
            });
        }
        let entry = self
            .store
            .post(Posting {
                account_id: target,
                amount,
                kind: EntryKind::Admin,
                description: format!("Support adjustment: {reason}"),
                notify: Some(NewNotification {
                    title: "Balance adjusted".to_string(),
                    body: format!(
                        "An administrator adjusted your balance by {amount} points: {reason}"
                    ),
                }),
            })
            .await?;
        info!(
            admin = %actor.account_id,
            target = %target,
            amount,
            "admin balance adjustment applied"
        );
        Ok(entry)
    }

    pub async fn set_role(
        &self,
        actor: &AdminActor,
        account_id: Uuid,
        role: Role,
    ) -> Result<Account, LedgerError> {
        let account = self.store.set_role(account_id, role).await?;
        info!(
            admin = %actor.account_id,
            account = %account_id,
            role = role.as_str(),
            "account role changed"
        );
        Ok(account)
    }

    pub async fn notifications(
        &self,
        account_id: Uuid,
        unread_only: bool,
    ) -> Result<Vec<Notification>, LedgerError> {
        Ok(self.store.notifications(account_id, unread_only).await?)
    }

    pub async fn mark_notification_read(
        &self,
        account_id: Uuid,
        notification_id: Uuid,
    ) -> Result<Notification, LedgerError> {
        Ok(self
            .store
            .mark_notification_read(notification_id, account_id)
            .await?)
    }

    pub async fn reconcile_account(
        &self,
        account_id: Uuid,
    ) -> Result<AccountReconciliation, LedgerError> {
        Ok(self.store.reconcile(account_id).await?)
    }

    /// Full sweep: compare every balance to the sum of its entries and
    /// record the result. Drift means a bug or manual tampering; it is
    /// logged loudly but never auto-corrected.
    pub async fn run_reconciliation(&self) -> Result<ReconciliationRun, LedgerError> {
        let reports = self.store.reconcile_all().await?;
        let drifted: Vec<&AccountReconciliation> =
            reports.iter().filter(|report| report.drift() != 0).collect();
        for report in &drifted {
            error!(
                account = %report.account_id,
                balance = report.balance,
                entry_total = report.entry_total,
                "balance does not match its entries"
            );
        }
        let notes = if drifted.is_empty() {
            None
        } else {
            Some(
                drifted
                    .iter()
                    .map(|report| report.account_id.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        };
        let run = self
            .store
            .record_reconciliation_run(NewReconciliationRun {
                accounts_checked: reports.len() as i64,
                drift_count: drifted.len() as i64,
                notes,
            })
            .await?;
        info!(
            checked = run.accounts_checked,
            drift = run.drift_count,
            "reconciliation sweep recorded"
        );
        Ok(run)
    }

    pub async fn reconciliation_runs(
        &self,
        limit: i64,
    ) -> Result<Vec<ReconciliationRun>, LedgerError> {
        Ok(self.store.reconciliation_runs(limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;
    use sparkhub_core::{
        EntryKind, LedgerStore, NewAccount, OfferDraft, ProjectStatus, Role, ServiceOffer,
        SubmissionFilter, SubmissionStatus,
    };
    use speculoos::prelude::*;
    use uuid::Uuid;

    use super::{AdminActor, Ledger, LedgerPolicy, NewTopUp, NewUpload, Ruling};
    use crate::error::LedgerError;
    use crate::files::{FileStoreError, MockFileStore};
    use crate::memory::MemoryLedgerStore;

    struct Harness {
        ledger: Ledger<MemoryLedgerStore, MockFileStore>,
        store: Arc<MemoryLedgerStore>,
    }

    fn harness(files: MockFileStore) -> Harness {
        let store = Arc::new(MemoryLedgerStore::new());
        let ledger = Ledger::new(store.clone(), Arc::new(files), LedgerPolicy::default());
        Harness { ledger, store }
    }

    fn promoting_files() -> MockFileStore {
        let mut files = MockFileStore::new();
        files.expect_promote().returning(|_| Ok(()));
        files
    }

    fn failing_files() -> MockFileStore {
        let mut files = MockFileStore::new();
        files
            .expect_promote()
            .returning(|file_ref| Err(FileStoreError::Missing(file_ref.to_string())));
        files
    }

    async fn member(harness: &Harness, balance: i64) -> Uuid {
        let id = Uuid::new_v4();
        harness
            .ledger
            .ensure_account(NewAccount {
                id,
                display_name: "Mara Voss".into(),
                email: format!("{id}@example.com"),
            })
            .await
            .unwrap();
        if balance > 0 {
            harness
                .ledger
                .post_entry(id, balance, EntryKind::Earn, "starting balance")
                .await
                .unwrap();
        }
        id
    }

    async fn admin(harness: &Harness) -> AdminActor {
        let id = member(harness, 0).await;
        harness.store.set_role(id, Role::Admin).await.unwrap();
        harness.ledger.require_admin(id).await.unwrap()
    }

    fn draft(cost_points: i64) -> OfferDraft {
        OfferDraft {
            name: "Featured placement".into(),
            description: "Pin a project on the front page for a week".into(),
            cost_points,
            discount_pct: None,
            per_unit: false,
            active: true,
            available_from: None,
            available_until: None,
        }
    }

    async fn listed_offer(harness: &Harness, cost_points: i64) -> ServiceOffer {
        let actor = admin(harness).await;
        harness
            .ledger
            .create_offer(&actor, draft(cost_points))
            .await
            .unwrap()
    }

    fn upload(file_ref: &str, offer_id: Option<Uuid>) -> NewUpload {
        NewUpload {
            title: "Solar balcony rig".into(),
            description: "Plans and wiring diagrams".into(),
            category: "hardware".into(),
            file_ref: file_ref.into(),
            offer_id,
            units: None,
            expedite_days: None,
        }
    }

    fn topup(amount: &str, reference: &str) -> NewTopUp {
        NewTopUp {
            amount: amount.parse::<Decimal>().unwrap(),
            currency: "usd".into(),
            method: "bank_transfer".into(),
            tx_reference: reference.into(),
        }
    }

    #[tokio::test]
    async fn purchase_debits_and_opens_a_pending_project() {
        let h = harness(promoting_files());
        let offer = listed_offer(&h, 15).await;
        let buyer = member(&h, 20).await;

        // repeated affordability reads must not leave any trace of their own
        for _ in 0..3 {
            assert!(h.ledger.has_sufficient_balance(buyer, 15).await.unwrap());
        }
        let receipt = h.ledger.purchase_offer(buyer, offer.id, None).await.unwrap();

        assert_that!(receipt.cost()).is_equal_to(15);
        assert_that!(receipt.balance_after()).is_equal_to(5);
        assert_that!(h.ledger.account(buyer).await.unwrap().balance).is_equal_to(5);

        let project = &receipt.project;
        assert_that!(project.status).is_equal_to(ProjectStatus::Pending);
        assert_that!(project.price_points).is_equal_to(15);
        assert!(project.file_ref.is_none());

        let notes = h.ledger.notifications(buyer, false).await.unwrap();
        assert_that!(notes.len()).is_equal_to(1);
        assert_that!(notes[0].title.as_str()).is_equal_to("Purchase confirmed");
    }

    #[tokio::test]
    async fn insufficient_balance_leaves_everything_untouched() {
        let h = harness(promoting_files());
        let offer = listed_offer(&h, 15).await;
        let buyer = member(&h, 10).await;

        let err = h
            .ledger
            .purchase_offer(buyer, offer.id, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientFunds {
                balance: 10,
                required: 15
            }
        ));

        assert_that!(h.ledger.account(buyer).await.unwrap().balance).is_equal_to(10);
        assert_that!(h.ledger.history(buyer, None).await.unwrap().len()).is_equal_to(1);
        assert_that!(h.ledger.notifications(buyer, false).await.unwrap().len()).is_equal_to(0);
        let projects = h.ledger.projects(Default::default()).await.unwrap();
        assert_that!(projects.len()).is_equal_to(0);
    }

    #[tokio::test]
    async fn concurrent_purchases_spend_the_balance_at_most_once() {
        let h = harness(promoting_files());
        let offer = listed_offer(&h, 15).await;
        let buyer = member(&h, 20).await;

        let (first, second) = tokio::join!(
            h.ledger.purchase_offer(buyer, offer.id, None),
            h.ledger.purchase_offer(buyer, offer.id, None),
        );

        let successes = [&first, &second]
            .iter()
            .filter(|result| result.is_ok())
            .count();
        assert_that!(successes).is_equal_to(1);
        let failure = if first.is_err() { first } else { second };
        assert!(matches!(
            failure.unwrap_err(),
            LedgerError::InsufficientFunds { .. }
        ));
        assert_that!(h.ledger.account(buyer).await.unwrap().balance).is_equal_to(5);
    }

    #[tokio::test]
    async fn affordability_check_is_fail_closed_for_unknown_accounts() {
        let h = harness(promoting_files());
        let buyer = member(&h, 10).await;

        assert!(h.ledger.has_sufficient_balance(buyer, 10).await.unwrap());
        assert!(!h.ledger.has_sufficient_balance(buyer, 11).await.unwrap());
        assert!(
            !h.ledger
                .has_sufficient_balance(Uuid::new_v4(), 1)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn discounted_offer_charges_the_reduced_price() {
        let h = harness(promoting_files());
        let actor = admin(&h).await;
        let offer = h
            .ledger
            .create_offer(
                &actor,
                OfferDraft {
                    discount_pct: Some(25),
                    ..draft(100)
                },
            )
            .await
            .unwrap();
        let buyer = member(&h, 100).await;

        let receipt = h.ledger.purchase_offer(buyer, offer.id, None).await.unwrap();
        assert_that!(receipt.cost()).is_equal_to(75);
    }

    #[tokio::test]
    async fn retired_and_out_of_window_offers_cannot_be_bought() {
        let h = harness(promoting_files());
        let actor = admin(&h).await;
        let buyer = member(&h, 100).await;

        let retired = h.ledger.create_offer(&actor, draft(10)).await.unwrap();
        h.ledger.retire_offer(&actor, retired.id).await.unwrap();
        let err = h
            .ledger
            .purchase_offer(buyer, retired.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::OfferUnavailable { .. }));

        let future = h
            .ledger
            .create_offer(
                &actor,
                OfferDraft {
                    available_from: Some(Utc::now() + Duration::days(7)),
                    ..draft(10)
                },
            )
            .await
            .unwrap();
        let err = h
            .ledger
            .purchase_offer(buyer, future.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::OfferUnavailable { .. }));
    }

    #[tokio::test]
    async fn offer_drafts_are_validated() {
        let h = harness(promoting_files());
        let actor = admin(&h).await;

        let err = h.ledger.create_offer(&actor, draft(0)).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));

        let err = h
            .ledger
            .create_offer(
                &actor,
                OfferDraft {
                    discount_pct: Some(101),
                    ..draft(10)
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));

        let err = h
            .ledger
            .create_offer(
                &actor,
                OfferDraft {
                    available_from: Some(Utc::now()),
                    available_until: Some(Utc::now() - Duration::days(1)),
                    ..draft(10)
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidWindow));

        let err = h
            .ledger
            .create_offer(
                &actor,
                OfferDraft {
                    name: "  ".into(),
                    ..draft(10)
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::MissingField("name")));
    }

    #[tokio::test]
    async fn upload_charges_base_fee_plus_expedite() {
        let h = harness(promoting_files());
        let owner = member(&h, 50).await;

        let receipt = h
            .ledger
            .upload_project(
                owner,
                NewUpload {
                    expedite_days: Some(3),
                    ..upload("staged/rig.zip", None)
                },
            )
            .await
            .unwrap();

        // base fee 10 plus 3 days at 5 points
        assert_that!(receipt.cost()).is_equal_to(25);
        assert_that!(receipt.project.expedite_days).is_equal_to(Some(3));
        assert_that!(h.ledger.account(owner).await.unwrap().balance).is_equal_to(25);
    }

    #[tokio::test]
    async fn extreme_unit_counts_saturate_the_charge_instead_of_wrapping() {
        // No promote expectation: the refused debit must never reach the
        // file store.
        let h = harness(MockFileStore::new());
        let actor = admin(&h).await;
        let offer = h
            .ledger
            .create_offer(
                &actor,
                OfferDraft {
                    per_unit: true,
                    ..draft(2)
                },
            )
            .await
            .unwrap();
        let owner = member(&h, 10).await;

        let err = h
            .ledger
            .upload_project(
                owner,
                NewUpload {
                    units: Some(i64::MAX),
                    expedite_days: Some(1),
                    ..upload("staged/bulk.zip", Some(offer.id))
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientFunds {
                balance: 10,
                required: i64::MAX
            }
        ));

        assert_that!(h.ledger.account(owner).await.unwrap().balance).is_equal_to(10);
        assert_that!(h.ledger.history(owner, None).await.unwrap().len()).is_equal_to(1);
        let projects = h.ledger.projects(Default::default()).await.unwrap();
        assert_that!(projects.len()).is_equal_to(0);
    }

    #[tokio::test]
    async fn upload_promotes_the_staged_reference_exactly_once() {
        let mut files = MockFileStore::new();
        files
            .expect_promote()
            .withf(|file_ref| file_ref == "staged/rig.zip")
            .times(1)
            .returning(|_| Ok(()));
        let h = harness(files);
        let owner = member(&h, 50).await;

        let receipt = h
            .ledger
            .upload_project(owner, upload("staged/rig.zip", None))
            .await
            .unwrap();
        assert_that!(receipt.project.file_ref.clone()).is_equal_to(Some("staged/rig.zip".into()));
    }

    #[tokio::test]
    async fn failed_promotion_refunds_the_debit() {
        let h = harness(failing_files());
        let owner = member(&h, 40).await;

        let err = h
            .ledger
            .upload_project(owner, upload("staged/lost.zip", None))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::SideEffectFailed(_)));

        assert_that!(h.ledger.account(owner).await.unwrap().balance).is_equal_to(40);
        let history = h.ledger.history(owner, None).await.unwrap();
        // seed credit, the debit, and the compensating credit
        assert_that!(history.len()).is_equal_to(3);
        assert_that!(history[0].amount).is_equal_to(10);
        assert_that!(history[1].amount).is_equal_to(-10);

        let projects = h.ledger.projects(Default::default()).await.unwrap();
        assert_that!(projects[0].status).is_equal_to(ProjectStatus::Failed);

        let report = h.ledger.reconcile_account(owner).await.unwrap();
        assert_that!(report.drift()).is_equal_to(0);

        let notes = h.ledger.notifications(owner, false).await.unwrap();
        assert!(notes.iter().any(|note| note.title == "Upload failed"));
    }

    #[tokio::test]
    async fn verified_topup_credits_the_tiered_amount() {
        let h = harness(promoting_files());
        let actor = admin(&h).await;
        let saver = member(&h, 0).await;

        let submission = h
            .ledger
            .submit_topup(saver, topup("250", "wire-001"))
            .await
            .unwrap();
        assert_that!(submission.status).is_equal_to(SubmissionStatus::Submitted);
        assert_that!(submission.currency.as_str()).is_equal_to("USD");

        let outcome = h.ledger.verify_topup(&actor, submission.id).await.unwrap();
        assert_that!(outcome.submission.status).is_equal_to(SubmissionStatus::Verified);
        assert_that!(outcome.submission.credited_points).is_equal_to(Some(257));
        assert_that!(outcome.submission.decided_by).is_equal_to(Some(actor.account_id()));
        assert_that!(outcome.entry.unwrap().amount).is_equal_to(257);
        assert_that!(h.ledger.account(saver).await.unwrap().balance).is_equal_to(257);

        let notes = h.ledger.notifications(saver, false).await.unwrap();
        assert!(notes.iter().any(|note| note.title == "Top-up verified"));
    }

    #[tokio::test]
    async fn a_topup_can_be_decided_only_once() {
        let h = harness(promoting_files());
        let actor = admin(&h).await;
        let saver = member(&h, 0).await;
        let submission = h
            .ledger
            .submit_topup(saver, topup("100", "wire-002"))
            .await
            .unwrap();

        h.ledger.verify_topup(&actor, submission.id).await.unwrap();
        let err = h
            .ledger
            .verify_topup(&actor, submission.id)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyDecided { .. }));

        let err = h
            .ledger
            .reject_topup(&actor, submission.id, "changed my mind")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyDecided { .. }));

        // credited exactly once
        assert_that!(h.ledger.account(saver).await.unwrap().balance).is_equal_to(103);
    }

    #[tokio::test]
    async fn rejection_requires_a_reason() {
        let h = harness(promoting_files());
        let actor = admin(&h).await;
        let saver = member(&h, 0).await;
        let submission = h
            .ledger
            .submit_topup(saver, topup("100", "wire-003"))
            .await
            .unwrap();

        let err = h
            .ledger
            .reject_topup(&actor, submission.id, "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::EmptyReason));

        let still_pending = h
            .ledger
            .topups(SubmissionFilter {
                account_id: Some(saver),
                status: Some(SubmissionStatus::Submitted),
                limit: None,
            })
            .await
            .unwrap();
        assert_that!(still_pending.len()).is_equal_to(1);
    }

    #[tokio::test]
    async fn rejection_touches_no_balance_and_no_entries() {
        let h = harness(promoting_files());
        let actor = admin(&h).await;
        let saver = member(&h, 0).await;
        let submission = h
            .ledger
            .submit_topup(saver, topup("100", "wire-004"))
            .await
            .unwrap();

        let rejected = h
            .ledger
            .reject_topup(&actor, submission.id, "no matching transfer found")
            .await
            .unwrap();
        assert_that!(rejected.status).is_equal_to(SubmissionStatus::Rejected);
        assert_that!(rejected.decision_reason.clone())
            .is_equal_to(Some("no matching transfer found".to_string()));

        assert_that!(h.ledger.account(saver).await.unwrap().balance).is_equal_to(0);
        assert_that!(h.ledger.history(saver, None).await.unwrap().len()).is_equal_to(0);
        let notes = h.ledger.notifications(saver, false).await.unwrap();
        assert!(notes.iter().any(|note| note.title == "Top-up rejected"));
    }

    #[tokio::test]
    async fn duplicate_reference_is_rejected_per_account() {
        let h = harness(promoting_files());
        let saver = member(&h, 0).await;
        let other = member(&h, 0).await;

        h.ledger
            .submit_topup(saver, topup("50", "wire-dup"))
            .await
            .unwrap();
        let err = h
            .ledger
            .submit_topup(saver, topup("60", "wire-dup"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateReference { .. }));

        // a different account may reuse the reference
        h.ledger
            .submit_topup(other, topup("60", "wire-dup"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn topup_amounts_are_validated() {
        let h = harness(promoting_files());
        let saver = member(&h, 0).await;

        let err = h
            .ledger
            .submit_topup(saver, topup("0", "wire-zero"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));

        let err = h
            .ledger
            .submit_topup(saver, topup("2000000", "wire-huge"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));
    }

    #[tokio::test]
    async fn only_admins_obtain_the_capability() {
        let h = harness(promoting_files());
        let user = member(&h, 0).await;

        let err = h.ledger.require_admin(user).await.unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized { .. }));

        let err = h.ledger.require_admin(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(_)));

        h.store.set_role(user, Role::Employee).await.unwrap();
        let err = h.ledger.require_admin(user).await.unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn adjustments_are_bounded_and_audited() {
        let h = harness(promoting_files());
        let actor = admin(&h).await;
        let target = member(&h, 100).await;

        let err = h
            .ledger
            .admin_adjust(&actor, target, 10_001, "goodwill")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AdjustmentTooLarge { .. }));

        let err = h
            .ledger
            .admin_adjust(&actor, target, 50, "  ")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::EmptyReason));

        let err = h
            .ledger
            .admin_adjust(&actor, target, 0, "noop")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));

        let entry = h
            .ledger
            .admin_adjust(&actor, target, -30, "duplicate credit cleanup")
            .await
            .unwrap();
        assert_that!(entry.kind).is_equal_to(EntryKind::Admin);
        assert_that!(entry.balance_after).is_equal_to(70);
        let notes = h.ledger.notifications(target, false).await.unwrap();
        assert!(notes.iter().any(|note| note.title == "Balance adjusted"));
    }

    #[tokio::test]
    async fn rejected_project_can_refund_the_charge() {
        let h = harness(promoting_files());
        let actor = admin(&h).await;
        let owner = member(&h, 30).await;

        let receipt = h
            .ledger
            .upload_project(owner, upload("staged/rig.zip", None))
            .await
            .unwrap();
        assert_that!(h.ledger.account(owner).await.unwrap().balance).is_equal_to(20);

        let outcome = h
            .ledger
            .decide_project(
                &actor,
                receipt.project.id,
                Ruling::Reject {
                    reason: "duplicate of an existing project".into(),
                    refund: true,
                },
            )
            .await
            .unwrap();
        assert_that!(outcome.project.status).is_equal_to(ProjectStatus::Rejected);
        assert_that!(outcome.project.decision_reason.clone())
            .is_equal_to(Some("duplicate of an existing project".to_string()));
        let refund = outcome.refund_entry.unwrap();
        assert_that!(refund.amount).is_equal_to(10);
        assert_that!(refund.kind).is_equal_to(EntryKind::Admin);
        assert_that!(h.ledger.account(owner).await.unwrap().balance).is_equal_to(30);

        let err = h
            .ledger
            .decide_project(&actor, receipt.project.id, Ruling::Approve)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyDecided { .. }));
    }

    #[tokio::test]
    async fn project_rejection_requires_a_reason() {
        let h = harness(promoting_files());
        let actor = admin(&h).await;
        let owner = member(&h, 30).await;
        let receipt = h
            .ledger
            .upload_project(owner, upload("staged/rig.zip", None))
            .await
            .unwrap();

        let err = h
            .ledger
            .decide_project(
                &actor,
                receipt.project.id,
                Ruling::Reject {
                    reason: " ".into(),
                    refund: false,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::EmptyReason));
        assert_that!(h.ledger.project(receipt.project.id).await.unwrap().status)
            .is_equal_to(ProjectStatus::Pending);
    }

    #[tokio::test]
    async fn approval_notifies_the_owner() {
        let h = harness(promoting_files());
        let actor = admin(&h).await;
        let owner = member(&h, 30).await;
        let receipt = h
            .ledger
            .upload_project(owner, upload("staged/rig.zip", None))
            .await
            .unwrap();

        let outcome = h
            .ledger
            .decide_project(&actor, receipt.project.id, Ruling::Approve)
            .await
            .unwrap();
        assert_that!(outcome.project.status).is_equal_to(ProjectStatus::Approved);
        assert!(outcome.refund_entry.is_none());

        let notes = h.ledger.notifications(owner, false).await.unwrap();
        assert!(notes.iter().any(|note| note.title == "Project approved"));
    }

    #[tokio::test]
    async fn every_balance_equals_the_sum_of_its_entries() {
        let h = harness(promoting_files());
        let actor = admin(&h).await;
        let offer = listed_offer(&h, 40).await;
        let account = member(&h, 100).await;

        h.ledger
            .purchase_offer(account, offer.id, None)
            .await
            .unwrap();
        let submission = h
            .ledger
            .submit_topup(account, topup("500", "wire-mix"))
            .await
            .unwrap();
        h.ledger.verify_topup(&actor, submission.id).await.unwrap();
        h.ledger
            .admin_adjust(&actor, account, -25, "promo misfire")
            .await
            .unwrap();

        let report = h.ledger.reconcile_account(account).await.unwrap();
        assert_that!(report.drift()).is_equal_to(0);
        assert_that!(report.balance).is_equal_to(100 - 40 + 520 - 25);

        let run = h.ledger.run_reconciliation().await.unwrap();
        assert_that!(run.drift_count).is_equal_to(0);
        assert!(run.accounts_checked >= 2);

        let runs = h.ledger.reconciliation_runs(10).await.unwrap();
        assert_that!(runs.len()).is_equal_to(1);
    }

    #[tokio::test]
    async fn notifications_can_be_marked_read_by_their_owner_only() {
        let h = harness(promoting_files());
        let offer = listed_offer(&h, 5).await;
        let buyer = member(&h, 10).await;
        let stranger = member(&h, 0).await;

        h.ledger.purchase_offer(buyer, offer.id, None).await.unwrap();
        let unread = h.ledger.notifications(buyer, true).await.unwrap();
        assert_that!(unread.len()).is_equal_to(1);

        let err = h
            .ledger
            .mark_notification_read(stranger, unread[0].id)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { .. }));

        h.ledger
            .mark_notification_read(buyer, unread[0].id)
            .await
            .unwrap();
        assert_that!(h.ledger.notifications(buyer, true).await.unwrap().len()).is_equal_to(0);
        assert_that!(h.ledger.notifications(buyer, false).await.unwrap().len()).is_equal_to(1);
    }

    #[tokio::test]
    async fn history_is_newest_first_with_running_balances() {
        let h = harness(promoting_files());
        let account = member(&h, 0).await;

        h.ledger
            .post_entry(account, 40, EntryKind::Earn, "signup bonus")
            .await
            .unwrap();
        h.ledger
            .post_entry(account, -15, EntryKind::Spend, "sticker pack")
            .await
            .unwrap();

        let history = h.ledger.history(account, None).await.unwrap();
        assert_that!(history.len()).is_equal_to(2);
        assert_that!(history[0].amount).is_equal_to(-15);
        assert_that!(history[0].balance_after).is_equal_to(25);
        assert_that!(history[1].balance_after).is_equal_to(40);
    }
}
