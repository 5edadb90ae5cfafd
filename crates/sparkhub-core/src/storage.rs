use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{
    Account, AccountReconciliation, EntryKind, LedgerEntry, Notification, PaymentSubmission,
    ProjectStatus, ReconciliationRun, Role, ServiceOffer, SubmissionStatus, UploadedProject,
};

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub id: Uuid,
    pub display_name: String,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub title: String,
    pub body: String,
}

/// One balance mutation: the amount, the entry describing it, and the
/// notification announcing it. A store applies all three effects in a single
/// transaction.
#[derive(Debug, Clone)]
pub struct Posting {
    pub account_id: Uuid,
    pub amount: i64,
    pub kind: EntryKind,
    pub description: String,
    pub notify: Option<NewNotification>,
}

#[derive(Debug, Clone)]
pub struct NewProject {
    pub offer_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub category: String,
    pub file_ref: Option<String>,
    pub price_points: i64,
    pub expedite_days: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct PurchaseOutcome {
    pub entry: LedgerEntry,
    pub project: UploadedProject,
}

#[derive(Debug, Clone)]
pub struct OfferDraft {
    pub name: String,
    pub description: String,
    pub cost_points: i64,
    pub discount_pct: Option<i32>,
    pub per_unit: bool,
    pub active: bool,
    pub available_from: Option<DateTime<Utc>>,
    pub available_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OfferFilter {
    /// When set, only offers that are active and inside their availability
    /// window at this instant are returned.
    pub only_available_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectFilter {
    pub account_id: Option<Uuid>,
    pub status: Option<ProjectStatus>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone)]
pub enum ProjectVerdict {
    Approved,
    Rejected {
        /// Compensating credit returned to the owner, when the moderator
        /// grants a refund of the purchase price.
        refund: Option<Posting>,
    },
}

#[derive(Debug, Clone)]
pub struct ProjectDecision {
    pub verdict: ProjectVerdict,
    pub reason: Option<String>,
    pub notify: NewNotification,
}

#[derive(Debug, Clone)]
pub struct ProjectDecisionOutcome {
    pub project: UploadedProject,
    pub refund_entry: Option<LedgerEntry>,
}

#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub account_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub method: String,
    pub tx_reference: String,
}

#[derive(Debug, Clone, Default)]
pub struct SubmissionFilter {
    pub account_id: Option<Uuid>,
    pub status: Option<SubmissionStatus>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone)]
pub enum SubmissionVerdict {
    /// The credit posting carries the tier-adjusted amount and the success
    /// notification; it commits together with the status transition.
    Verified { posting: Posting },
    Rejected {
        reason: String,
        notify: NewNotification,
    },
}

#[derive(Debug, Clone)]
pub struct SubmissionDecision {
    pub decided_by: Uuid,
    pub verdict: SubmissionVerdict,
}

#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    pub submission: PaymentSubmission,
    pub entry: Option<LedgerEntry>,
}

#[derive(Debug, Clone)]
pub struct NewReconciliationRun {
    pub accounts_checked: i64,
    pub drift_count: i64,
    pub notes: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("account {0} does not exist")]
    AccountNotFound(Uuid),

    /// A debit would have taken the balance below zero. Raised by the store
    /// itself: the balance check and the write are one atomic step.
    #[error("insufficient balance: have {balance}, need {required}")]
    InsufficientFunds { balance: i64, required: i64 },

    #[error("{entity} {id} does not exist")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("{entity} {id} was already decided ({status})")]
    AlreadyDecided {
        entity: &'static str,
        id: Uuid,
        status: String,
    },

    #[error("account {account_id} already submitted reference {reference:?}")]
    DuplicateReference { account_id: Uuid, reference: String },

    /// Concrete adapter errors: connectivity, constraint violations, and
    /// anything else outside the domain model.
    #[error("backend error: {0:?}")]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        StoreError::Backend(Box::new(err))
    }
}

/// Storage contract for the points ledger. Every mutating method is an
/// atomic unit: all of its writes commit together or none of them do, and
/// non-negative balances are enforced at this boundary.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn ensure_account(&self, account: NewAccount) -> Result<Account, StoreError>;
    async fn account(&self, account_id: Uuid) -> Result<Option<Account>, StoreError>;
    async fn entries(&self, account_id: Uuid, limit: i64) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Apply one posting: conditional balance update, entry append and
    /// optional notification, as a single transaction.
    async fn post(&self, posting: Posting) -> Result<LedgerEntry, StoreError>;

    /// Purchase commit: the debit posting plus the pending artifact row in
    /// one transaction. The artifact never exists without its debit.
    async fn post_purchase(
        &self,
        posting: Posting,
        project: NewProject,
    ) -> Result<PurchaseOutcome, StoreError>;

    /// Saga compensation: mark the pending artifact failed and credit the
    /// purchase price back, atomically.
    async fn compensate_purchase(
        &self,
        project_id: Uuid,
        posting: Posting,
    ) -> Result<LedgerEntry, StoreError>;

    async fn create_offer(&self, draft: OfferDraft) -> Result<ServiceOffer, StoreError>;
    async fn update_offer(
        &self,
        offer_id: Uuid,
        draft: OfferDraft,
    ) -> Result<ServiceOffer, StoreError>;
    async fn retire_offer(&self, offer_id: Uuid) -> Result<ServiceOffer, StoreError>;
    async fn offer(&self, offer_id: Uuid) -> Result<Option<ServiceOffer>, StoreError>;
    async fn offers(&self, filter: OfferFilter) -> Result<Vec<ServiceOffer>, StoreError>;

    async fn project(&self, project_id: Uuid) -> Result<Option<UploadedProject>, StoreError>;
    async fn projects(&self, filter: ProjectFilter) -> Result<Vec<UploadedProject>, StoreError>;

    /// Moderation transition, valid only from `pending`. A rejection may
    /// carry a refund posting that commits with the transition.
    async fn decide_project(
        &self,
        project_id: Uuid,
        decision: ProjectDecision,
    ) -> Result<ProjectDecisionOutcome, StoreError>;

    async fn create_submission(
        &self,
        submission: NewSubmission,
    ) -> Result<PaymentSubmission, StoreError>;
    async fn submission(
        &self,
        submission_id: Uuid,
    ) -> Result<Option<PaymentSubmission>, StoreError>;
    async fn submissions(
        &self,
        filter: SubmissionFilter,
    ) -> Result<Vec<PaymentSubmission>, StoreError>;

    /// Top-up decision, valid only from `submitted`; `verified` and
    /// `rejected` are terminal. A verification commits its credit posting in
    /// the same transaction as the transition, so it can fire at most once.
    async fn decide_submission(
        &self,
        submission_id: Uuid,
        decision: SubmissionDecision,
    ) -> Result<DecisionOutcome, StoreError>;

    async fn set_role(&self, account_id: Uuid, role: Role) -> Result<Account, StoreError>;

    async fn notifications(
        &self,
        account_id: Uuid,
        unread_only: bool,
    ) -> Result<Vec<Notification>, StoreError>;
    async fn mark_notification_read(
        &self,
        notification_id: Uuid,
        account_id: Uuid,
    ) -> Result<Notification, StoreError>;
    async fn mark_notifications_delivered(&self, account_id: Uuid) -> Result<u64, StoreError>;

    async fn reconcile(&self, account_id: Uuid) -> Result<AccountReconciliation, StoreError>;
    async fn reconcile_all(&self) -> Result<Vec<AccountReconciliation>, StoreError>;
    async fn record_reconciliation_run(
        &self,
        run: NewReconciliationRun,
    ) -> Result<ReconciliationRun, StoreError>;
    async fn reconciliation_runs(&self, limit: i64)
    -> Result<Vec<ReconciliationRun>, StoreError>;
}
