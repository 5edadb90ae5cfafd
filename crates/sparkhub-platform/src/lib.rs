pub mod config;
pub mod contracts;
pub mod db;
pub mod redis_bus;

pub use config::{LedgerSettings, ServiceConfig};
pub use contracts::{
    AccountView, AdminAdjustRequest, BalanceResponse, EnsureAccountRequest, EntryView,
    LedgerPostedEvent, MarkReadRequest, NotificationView, OfferUpsertRequest, OfferView,
    ProjectDecisionRequest, ProjectDecisionResponse, ProjectView, PurchaseRequest,
    PurchaseResponse, ReconciliationRunView, RejectTopUpRequest, RetireOfferRequest,
    RunReconciliationRequest, SetRoleRequest, SubmissionView, TopUpRequest, TopUpSubmittedEvent,
    UploadProjectRequest, UploadProjectResponse, VerifyTopUpRequest, VerifyTopUpResponse,
};
pub use db::{connect_database, run_migrations};
pub use redis_bus::{LEDGER_POSTED, RedisBus, TOPUPS_SUBMITTED};
