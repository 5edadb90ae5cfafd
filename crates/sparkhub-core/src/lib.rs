pub mod models;
pub mod storage;

pub use models::{
    Account, AccountReconciliation, EntryKind, LedgerEntry, Notification, PaymentSubmission,
    ProjectStatus, ReconciliationRun, Role, ServiceOffer, SubmissionStatus, UploadedProject,
};
pub use storage::{
    DecisionOutcome, LedgerStore, NewAccount, NewNotification, NewProject, NewReconciliationRun,
    NewSubmission, OfferDraft, OfferFilter, Posting, ProjectDecision, ProjectDecisionOutcome,
    ProjectFilter, ProjectVerdict, PurchaseOutcome, StoreError, SubmissionDecision,
    SubmissionFilter, SubmissionVerdict,
};
