use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sparkhub_core::{
    Account, EntryKind, LedgerEntry, Notification, PaymentSubmission, ProjectStatus,
    ReconciliationRun, Role, ServiceOffer, SubmissionStatus, UploadedProject,
};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsureAccountRequest {
    pub account_id: Uuid,
    pub display_name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountView {
    pub id: Uuid,
    pub display_name: String,
    pub email: String,
    pub role: Role,
    pub balance: i64,
    pub created_at: DateTime<Utc>,
}

impl From<Account> for AccountView {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            display_name: account.display_name,
            email: account.email,
            role: account.role,
            balance: account.balance,
            created_at: account.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub account_id: Uuid,
    pub balance: i64,
    /// Present when the caller asked whether a specific charge would fit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sufficient: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryView {
    pub id: Uuid,
    pub account_id: Uuid,
    pub amount: i64,
    pub balance_after: i64,
    pub kind: EntryKind,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl From<LedgerEntry> for EntryView {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            id: entry.id,
            account_id: entry.account_id,
            amount: entry.amount,
            balance_after: entry.balance_after,
            kind: entry.kind,
            description: entry.description,
            created_at: entry.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferView {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub cost_points: i64,
    pub discount_pct: Option<i32>,
    pub per_unit: bool,
    pub active: bool,
    pub available_from: Option<DateTime<Utc>>,
    pub available_until: Option<DateTime<Utc>>,
}

impl From<ServiceOffer> for OfferView {
    fn from(offer: ServiceOffer) -> Self {
        Self {
            id: offer.id,
            name: offer.name,
            description: offer.description,
            cost_points: offer.cost_points,
            discount_pct: offer.discount_pct,
            per_unit: offer.per_unit,
            active: offer.active,
            available_from: offer.available_from,
            available_until: offer.available_until,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub account_id: Uuid,
    pub offer_id: Uuid,
    pub units: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseResponse {
    pub project_id: Uuid,
    pub entry_id: Uuid,
    pub cost_points: i64,
    pub balance_after: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadProjectRequest {
    pub account_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    pub file_ref: String,
    pub offer_id: Option<Uuid>,
    pub units: Option<i64>,
    pub expedite_days: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadProjectResponse {
    pub project: ProjectView,
    pub cost_points: i64,
    pub balance_after: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectView {
    pub id: Uuid,
    pub account_id: Uuid,
    pub offer_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub category: String,
    pub file_ref: Option<String>,
    pub status: ProjectStatus,
    pub price_points: i64,
    pub expedite_days: Option<i32>,
    pub decision_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UploadedProject> for ProjectView {
    fn from(project: UploadedProject) -> Self {
        Self {
            id: project.id,
            account_id: project.account_id,
            offer_id: project.offer_id,
            title: project.title,
            description: project.description,
            category: project.category,
            file_ref: project.file_ref,
            status: project.status,
            price_points: project.price_points,
            expedite_days: project.expedite_days,
            decision_reason: project.decision_reason,
            created_at: project.created_at,
            updated_at: project.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopUpRequest {
    pub account_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub method: String,
    pub tx_reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionView {
    pub id: Uuid,
    pub account_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub method: String,
    pub tx_reference: String,
    pub status: SubmissionStatus,
    pub credited_points: Option<i64>,
    pub decided_by: Option<Uuid>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decision_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<PaymentSubmission> for SubmissionView {
    fn from(submission: PaymentSubmission) -> Self {
        Self {
            id: submission.id,
            account_id: submission.account_id,
            amount: submission.amount,
            currency: submission.currency,
            method: submission.method,
            tx_reference: submission.tx_reference,
            status: submission.status,
            credited_points: submission.credited_points,
            decided_by: submission.decided_by,
            decided_at: submission.decided_at,
            decision_reason: submission.decision_reason,
            created_at: submission.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationView {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

impl From<Notification> for NotificationView {
    fn from(notification: Notification) -> Self {
        Self {
            id: notification.id,
            title: notification.title,
            body: notification.body,
            created_at: notification.created_at,
            delivered_at: notification.delivered_at,
            read_at: notification.read_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkReadRequest {
    pub account_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyTopUpRequest {
    pub admin_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyTopUpResponse {
    pub submission: SubmissionView,
    pub entry: Option<EntryView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectTopUpRequest {
    pub admin_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminAdjustRequest {
    pub admin_id: Uuid,
    pub account_id: Uuid,
    pub amount: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferUpsertRequest {
    pub admin_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub cost_points: i64,
    pub discount_pct: Option<i32>,
    pub per_unit: Option<bool>,
    pub active: Option<bool>,
    pub available_from: Option<DateTime<Utc>>,
    pub available_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetireOfferRequest {
    pub admin_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDecisionRequest {
    pub admin_id: Uuid,
    pub approve: bool,
    pub reason: Option<String>,
    /// Return the purchase price on rejection. Ignored for approvals.
    pub refund: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDecisionResponse {
    pub project: ProjectView,
    pub refund_entry: Option<EntryView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetRoleRequest {
    pub admin_id: Uuid,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReconciliationRequest {
    pub admin_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationRunView {
    pub id: Uuid,
    pub run_at: DateTime<Utc>,
    pub accounts_checked: i64,
    pub drift_count: i64,
    pub notes: Option<String>,
}

impl From<ReconciliationRun> for ReconciliationRunView {
    fn from(run: ReconciliationRun) -> Self {
        Self {
            id: run.id,
            run_at: run.run_at,
            accounts_checked: run.accounts_checked,
            drift_count: run.drift_count,
            notes: run.notes,
        }
    }
}

/// Published on `ledger.posted` after a balance-moving transaction commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerPostedEvent {
    pub account_id: Uuid,
    pub entry_id: Uuid,
    pub amount: i64,
    pub balance_after: i64,
    pub kind: EntryKind,
}

impl From<&LedgerEntry> for LedgerPostedEvent {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            account_id: entry.account_id,
            entry_id: entry.id,
            amount: entry.amount,
            balance_after: entry.balance_after,
            kind: entry.kind,
        }
    }
}

/// Published on `topups.submitted` when a new claim lands in the review
/// queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopUpSubmittedEvent {
    pub submission_id: Uuid,
    pub account_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
}
