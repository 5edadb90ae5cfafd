use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sparkhub_core::{
    Account, AccountReconciliation, DecisionOutcome, LedgerEntry, LedgerStore, NewAccount,
    NewNotification, NewProject, NewReconciliationRun, NewSubmission, Notification, OfferDraft,
    OfferFilter, PaymentSubmission, Posting, ProjectDecision, ProjectDecisionOutcome,
    ProjectFilter, ProjectStatus, ProjectVerdict, PurchaseOutcome, ReconciliationRun, Role,
    ServiceOffer, StoreError, SubmissionDecision, SubmissionFilter, SubmissionStatus,
    SubmissionVerdict, UploadedProject,
};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<Uuid, Account>,
    entries: Vec<LedgerEntry>,
    offers: HashMap<Uuid, ServiceOffer>,
    projects: HashMap<Uuid, UploadedProject>,
    submissions: HashMap<Uuid, PaymentSubmission>,
    notifications: Vec<Notification>,
    runs: Vec<ReconciliationRun>,
}

/// In-memory ledger store. A single lock stands in for the database
/// transaction, so every mutating method is atomic the same way the Postgres
/// adapter is. Used by the engine test suites and by local scratch setups.
#[derive(Default)]
pub struct MemoryLedgerStore {
    state: RwLock<MemoryState>,
    #[cfg(test)]
    fail_next_append: std::sync::atomic::AtomicBool,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next posting fail between the balance write and the entry
    /// append, after rolling the balance back the way an aborted transaction
    /// would.
    #[cfg(test)]
    pub fn inject_append_failure(&self) {
        self.fail_next_append
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    fn apply_posting(
        &self,
        state: &mut MemoryState,
        posting: &Posting,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, StoreError> {
        let balance_after = {
            let account = state
                .accounts
                .get_mut(&posting.account_id)
                .ok_or(StoreError::AccountNotFound(posting.account_id))?;
            // Out-of-range arithmetic surfaces as a backend failure, the same
            // shape a bigint overflow takes in Postgres.
            let balance_after = account
                .balance
                .checked_add(posting.amount)
                .ok_or_else(|| StoreError::backend(std::io::Error::other("balance overflow")))?;
            if balance_after < 0 {
                return Err(StoreError::InsufficientFunds {
                    balance: account.balance,
                    required: posting.amount.saturating_neg(),
                });
            }
            account.balance = balance_after;
            account.updated_at = now;
            balance_after
        };

        #[cfg(test)]
        if self
            .fail_next_append
            .swap(false, std::sync::atomic::Ordering::SeqCst)
        {
            if let Some(account) = state.accounts.get_mut(&posting.account_id) {
                account.balance -= posting.amount;
            }
            return Err(StoreError::backend(std::io::Error::other(
                "injected append failure",
            )));
        }

        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            account_id: posting.account_id,
            amount: posting.amount,
            balance_after,
            kind: posting.kind,
            description: posting.description.clone(),
            created_at: now,
        };
        state.entries.push(entry.clone());
        if let Some(notify) = &posting.notify {
            push_notification(state, posting.account_id, notify, now);
        }
        Ok(entry)
    }
}

fn push_notification(
    state: &mut MemoryState,
    account_id: Uuid,
    notify: &NewNotification,
    now: DateTime<Utc>,
) {
    state.notifications.push(Notification {
        id: Uuid::new_v4(),
        account_id,
        title: notify.title.clone(),
        body: notify.body.clone(),
        created_at: now,
        delivered_at: None,
        read_at: None,
    });
}

fn take_limit(limit: Option<i64>) -> usize {
    limit.unwrap_or(100).max(0) as usize
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn ensure_account(&self, account: NewAccount) -> Result<Account, StoreError> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let account = state
            .accounts
            .entry(account.id)
            .or_insert_with(|| Account {
                id: account.id,
                display_name: account.display_name.clone(),
                email: account.email.clone(),
                role: Role::User,
                balance: 0,
                created_at: now,
                updated_at: now,
            })
            .clone();
        Ok(account)
    }

    async fn account(&self, account_id: Uuid) -> Result<Option<Account>, StoreError> {
        let state = self.state.read().await;
        Ok(state.accounts.get(&account_id).cloned())
    }

    async fn entries(&self, account_id: Uuid, limit: i64) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .iter()
            .rev()
            .filter(|entry| entry.account_id == account_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn post(&self, posting: Posting) -> Result<LedgerEntry, StoreError> {
        let mut state = self.state.write().await;
        self.apply_posting(&mut state, &posting, Utc::now())
    }

    async fn post_purchase(
        &self,
        posting: Posting,
        project: NewProject,
    ) -> Result<PurchaseOutcome, StoreError> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let entry = self.apply_posting(&mut state, &posting, now)?;
        let project = UploadedProject {
            id: Uuid::new_v4(),
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
        };
        state.projects.insert(project.id, project.clone());
        Ok(PurchaseOutcome { entry, project })
    }

    async fn compensate_purchase(
        &self,
        project_id: Uuid,
        posting: Posting,
    ) -> Result<LedgerEntry, StoreError> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        match state.projects.get(&project_id) {
            None => {
                return Err(StoreError::NotFound {
                    entity: "project",
                    id: project_id,
                });
            }
            Some(project) if project.status != ProjectStatus::Pending => {
                return Err(StoreError::AlreadyDecided {
                    entity: "project",
                    id: project_id,
                    status: project.status.as_str().to_string(),
                });
            }
            Some(_) => {}
        }
        let entry = self.apply_posting(&mut state, &posting, now)?;
        if let Some(project) = state.projects.get_mut(&project_id) {
            project.status = ProjectStatus::Failed;
            project.updated_at = now;
        }
        Ok(entry)
    }

    async fn create_offer(&self, draft: OfferDraft) -> Result<ServiceOffer, StoreError> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let offer = ServiceOffer {
            id: Uuid::new_v4(),
            name: draft.name,
            description: draft.description,
            cost_points: draft.cost_points,
            discount_pct: draft.discount_pct,
            per_unit: draft.per_unit,
            active: draft.active,
            available_from: draft.available_from,
            available_until: draft.available_until,
            created_at: now,
            updated_at: now,
        };
        state.offers.insert(offer.id, offer.clone());
        Ok(offer)
    }

    async fn update_offer(
        &self,
        offer_id: Uuid,
        draft: OfferDraft,
    ) -> Result<ServiceOffer, StoreError> {
        let mut state = self.state.write().await;
        let offer = state.offers.get_mut(&offer_id).ok_or(StoreError::NotFound {
            entity: "offer",
            id: offer_id,
        })?;
        offer.name = draft.name;
        offer.description = draft.description;
        offer.cost_points = draft.cost_points;
        offer.discount_pct = draft.discount_pct;
        offer.per_unit = draft.per_unit;
        offer.active = draft.active;
        offer.available_from = draft.available_from;
        offer.available_until = draft.available_until;
        offer.updated_at = Utc::now();
        Ok(offer.clone())
    }

    async fn retire_offer(&self, offer_id: Uuid) -> Result<ServiceOffer, StoreError> {
        let mut state = self.state.write().await;
        let offer = state.offers.get_mut(&offer_id).ok_or(StoreError::NotFound {
            entity: "offer",
            id: offer_id,
        })?;
        offer.active = false;
        offer.updated_at = Utc::now();
        Ok(offer.clone())
    }

    async fn offer(&self, offer_id: Uuid) -> Result<Option<ServiceOffer>, StoreError> {
        let state = self.state.read().await;
        Ok(state.offers.get(&offer_id).cloned())
    }

    async fn offers(&self, filter: OfferFilter) -> Result<Vec<ServiceOffer>, StoreError> {
        let state = self.state.read().await;
        let mut offers: Vec<ServiceOffer> = state
            .offers
            .values()
            .filter(|offer| match filter.only_available_at {
                Some(now) => offer.available_at(now),
                None => true,
            })
            .cloned()
            .collect();
        offers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(offers)
    }

    async fn project(&self, project_id: Uuid) -> Result<Option<UploadedProject>, StoreError> {
        let state = self.state.read().await;
        Ok(state.projects.get(&project_id).cloned())
    }

    async fn projects(&self, filter: ProjectFilter) -> Result<Vec<UploadedProject>, StoreError> {
        let state = self.state.read().await;
        let mut projects: Vec<UploadedProject> = state
            .projects
            .values()
            .filter(|project| {
                filter
                    .account_id
                    .is_none_or(|account_id| project.account_id == account_id)
                    && filter.status.is_none_or(|status| project.status == status)
            })
            .cloned()
            .collect();
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        projects.truncate(take_limit(filter.limit));
        Ok(projects)
    }

    async fn decide_project(
        &self,
        project_id: Uuid,
        decision: ProjectDecision,
    ) -> Result<ProjectDecisionOutcome, StoreError> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let (account_id, status) = match state.projects.get(&project_id) {
            None => {
                return Err(StoreError::NotFound {
                    entity: "project",
                    id: project_id,
                });
            }
            Some(project) => (project.account_id, project.status),
        };
        if status != ProjectStatus::Pending {
            return Err(StoreError::AlreadyDecided {
                entity: "project",
                id: project_id,
                status: status.as_str().to_string(),
            });
        }

        let (next_status, refund_entry) = match decision.verdict {
            ProjectVerdict::Approved => (ProjectStatus::Approved, None),
            ProjectVerdict::Rejected { refund } => {
                let entry = match refund {
                    Some(posting) => Some(self.apply_posting(&mut state, &posting, now)?),
                    None => None,
                };
                (ProjectStatus::Rejected, entry)
            }
        };

        push_notification(&mut state, account_id, &decision.notify, now);
        let project = state
            .projects
            .get_mut(&project_id)
            .ok_or(StoreError::NotFound {
                entity: "project",
                id: project_id,
            })?;
        project.status = next_status;
        project.decision_reason = decision.reason;
        project.updated_at = now;
        Ok(ProjectDecisionOutcome {
            project: project.clone(),
            refund_entry,
        })
    }

    async fn create_submission(
        &self,
        submission: NewSubmission,
    ) -> Result<PaymentSubmission, StoreError> {
        let mut state = self.state.write().await;
        let duplicate = state.submissions.values().any(|existing| {
            existing.account_id == submission.account_id
                && existing.tx_reference == submission.tx_reference
        });
        if duplicate {
            return Err(StoreError::DuplicateReference {
                account_id: submission.account_id,
                reference: submission.tx_reference,
            });
        }
        let record = PaymentSubmission {
            id: Uuid::new_v4(),
            account_id: submission.account_id,
            amount: submission.amount,
            currency: submission.currency,
            method: submission.method,
            tx_reference: submission.tx_reference,
            status: SubmissionStatus::Submitted,
            credited_points: None,
            decided_by: None,
            decided_at: None,
            decision_reason: None,
            created_at: Utc::now(),
        };
        state.submissions.insert(record.id, record.clone());
        Ok(record)
    }

    async fn submission(
        &self,
        submission_id: Uuid,
    ) -> Result<Option<PaymentSubmission>, StoreError> {
        let state = self.state.read().await;
        Ok(state.submissions.get(&submission_id).cloned())
    }

    async fn submissions(
        &self,
        filter: SubmissionFilter,
    ) -> Result<Vec<PaymentSubmission>, StoreError> {
        let state = self.state.read().await;
        let mut submissions: Vec<PaymentSubmission> = state
            .submissions
            .values()
            .filter(|submission| {
                filter
                    .account_id
                    .is_none_or(|account_id| submission.account_id == account_id)
                    && filter
                        .status
                        .is_none_or(|status| submission.status == status)
            })
            .cloned()
            .collect();
        submissions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        submissions.truncate(take_limit(filter.limit));
        Ok(submissions)
    }

    async fn decide_submission(
        &self,
        submission_id: Uuid,
        decision: SubmissionDecision,
    ) -> Result<DecisionOutcome, StoreError> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let (account_id, status) = match state.submissions.get(&submission_id) {
            None => {
                return Err(StoreError::NotFound {
                    entity: "submission",
                    id: submission_id,
                });
            }
            Some(submission) => (submission.account_id, submission.status),
        };
        if status != SubmissionStatus::Submitted {
            return Err(StoreError::AlreadyDecided {
                entity: "submission",
                id: submission_id,
                status: status.as_str().to_string(),
            });
        }

        let (next_status, reason, entry) = match decision.verdict {
            SubmissionVerdict::Verified { posting } => {
                let entry = self.apply_posting(&mut state, &posting, now)?;
                (SubmissionStatus::Verified, None, Some(entry))
            }
            SubmissionVerdict::Rejected { reason, notify } => {
                push_notification(&mut state, account_id, &notify, now);
                (SubmissionStatus::Rejected, Some(reason), None)
            }
        };

        let submission =
            state
                .submissions
                .get_mut(&submission_id)
                .ok_or(StoreError::NotFound {
                    entity: "submission",
                    id: submission_id,
                })?;
        submission.status = next_status;
        submission.credited_points = entry.as_ref().map(|entry| entry.amount);
        submission.decided_by = Some(decision.decided_by);
        submission.decided_at = Some(now);
        submission.decision_reason = reason;
        Ok(DecisionOutcome {
            submission: submission.clone(),
            entry,
        })
    }

    async fn set_role(&self, account_id: Uuid, role: Role) -> Result<Account, StoreError> {
        let mut state = self.state.write().await;
        let account = state
            .accounts
            .get_mut(&account_id)
            .ok_or(StoreError::AccountNotFound(account_id))?;
        account.role = role;
        account.updated_at = Utc::now();
        Ok(account.clone())
    }

    async fn notifications(
        &self,
        account_id: Uuid,
        unread_only: bool,
    ) -> Result<Vec<Notification>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .notifications
            .iter()
            .rev()
            .filter(|notification| {
                notification.account_id == account_id
                    && (!unread_only || notification.read_at.is_none())
            })
            .cloned()
            .collect())
    }

    async fn mark_notification_read(
        &self,
        notification_id: Uuid,
        account_id: Uuid,
    ) -> Result<Notification, StoreError> {
        let mut state = self.state.write().await;
        let notification = state
            .notifications
            .iter_mut()
            .find(|notification| {
                notification.id == notification_id && notification.account_id == account_id
            })
            .ok_or(StoreError::NotFound {
                entity: "notification",
                id: notification_id,
            })?;
        if notification.read_at.is_none() {
            notification.read_at = Some(Utc::now());
        }
        Ok(notification.clone())
    }

    async fn mark_notifications_delivered(&self, account_id: Uuid) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut marked = 0;
        for notification in state
            .notifications
            .iter_mut()
            .filter(|notification| {
                notification.account_id == account_id && notification.delivered_at.is_none()
            })
        {
            notification.delivered_at = Some(now);
            marked += 1;
        }
        Ok(marked)
    }

    async fn reconcile(&self, account_id: Uuid) -> Result<AccountReconciliation, StoreError> {
        let state = self.state.read().await;
        let account = state
            .accounts
            .get(&account_id)
            .ok_or(StoreError::AccountNotFound(account_id))?;
        Ok(reconcile_account(&state, account))
    }

    async fn reconcile_all(&self) -> Result<Vec<AccountReconciliation>, StoreError> {
        let state = self.state.read().await;
        let mut reports: Vec<AccountReconciliation> = state
            .accounts
            .values()
            .map(|account| reconcile_account(&state, account))
            .collect();
        reports.sort_by_key(|report| report.account_id);
        Ok(reports)
    }

    async fn record_reconciliation_run(
        &self,
        run: NewReconciliationRun,
    ) -> Result<ReconciliationRun, StoreError> {
        let mut state = self.state.write().await;
        let record = ReconciliationRun {
            id: Uuid::new_v4(),
            run_at: Utc::now(),
            accounts_checked: run.accounts_checked,
            drift_count: run.drift_count,
            notes: run.notes,
        };
        state.runs.push(record.clone());
        Ok(record)
    }

    async fn reconciliation_runs(
        &self,
        limit: i64,
    ) -> Result<Vec<ReconciliationRun>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .runs
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

fn reconcile_account(state: &MemoryState, account: &Account) -> AccountReconciliation {
    let entry_total = state
        .entries
        .iter()
        .filter(|entry| entry.account_id == account.id)
        .map(|entry| entry.amount)
        .sum();
    AccountReconciliation {
        account_id: account.id,
        balance: account.balance,
        entry_total,
    }
}

#[cfg(test)]
mod tests {
    use sparkhub_core::{EntryKind, LedgerStore, NewAccount, Posting, StoreError};
    use speculoos::prelude::*;
    use uuid::Uuid;

    use super::MemoryLedgerStore;

    fn posting(account_id: Uuid, amount: i64) -> Posting {
        Posting {
            account_id,
            amount,
            kind: if amount >= 0 {
                EntryKind::Earn
            } else {
                EntryKind::Spend
            },
            description: "test posting".into(),
            notify: None,
        }
    }

    async fn seeded(balance: i64) -> (MemoryLedgerStore, Uuid) {
        let store = MemoryLedgerStore::new();
        let account_id = Uuid::new_v4();
        store
            .ensure_account(NewAccount {
                id: account_id,
                display_name: "Mara".into(),
                email: "mara@example.com".into(),
            })
            .await
            .unwrap();
        if balance > 0 {
            store.post(posting(account_id, balance)).await.unwrap();
        }
        (store, account_id)
    }

    #[tokio::test]
    async fn debit_below_zero_is_refused_without_side_effects() {
        let (store, account_id) = seeded(10).await;

        let err = store.post(posting(account_id, -15)).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::InsufficientFunds {
                balance: 10,
                required: 15
            }
        ));

        let account = store.account(account_id).await.unwrap().unwrap();
        assert_that!(account.balance).is_equal_to(10);
        assert_that!(store.entries(account_id, 10).await.unwrap().len()).is_equal_to(1);
    }

    #[tokio::test]
    async fn credit_past_the_integer_ceiling_is_a_backend_error() {
        let (store, account_id) = seeded(10).await;

        let err = store.post(posting(account_id, i64::MAX)).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));

        let account = store.account(account_id).await.unwrap().unwrap();
        assert_that!(account.balance).is_equal_to(10);
        assert_that!(store.entries(account_id, 10).await.unwrap().len()).is_equal_to(1);
    }

    #[tokio::test]
    async fn injected_append_failure_rolls_the_balance_back() {
        let (store, account_id) = seeded(50).await;

        store.inject_append_failure();
        let err = store.post(posting(account_id, -20)).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));

        let account = store.account(account_id).await.unwrap().unwrap();
        assert_that!(account.balance).is_equal_to(50);

        let report = store.reconcile(account_id).await.unwrap();
        assert_that!(report.drift()).is_equal_to(0);
    }

    #[tokio::test]
    async fn entries_record_the_running_balance() {
        let (store, account_id) = seeded(0).await;

        store.post(posting(account_id, 30)).await.unwrap();
        store.post(posting(account_id, -12)).await.unwrap();
        let entries = store.entries(account_id, 10).await.unwrap();

        assert_that!(entries.len()).is_equal_to(2);
        assert_that!(entries[0].balance_after).is_equal_to(18);
        assert_that!(entries[1].balance_after).is_equal_to(30);
    }

    #[tokio::test]
    async fn ensure_account_is_idempotent() {
        let (store, account_id) = seeded(25).await;

        let again = store
            .ensure_account(NewAccount {
                id: account_id,
                display_name: "Different".into(),
                email: "other@example.com".into(),
            })
            .await
            .unwrap();

        assert_that!(again.balance).is_equal_to(25);
        assert_that!(again.display_name).is_equal_to("Mara".to_string());
    }
}
