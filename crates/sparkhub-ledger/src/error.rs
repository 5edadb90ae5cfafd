use sparkhub_core::StoreError;
use uuid::Uuid;

use crate::files::FileStoreError;

/// Failure modes of the points ledger. Domain outcomes callers are expected
/// to branch on get their own variant; backend faults stay wrapped.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient balance: have {balance}, need {required}")]
    InsufficientFunds { balance: i64, required: i64 },

    #[error("account {0} does not exist")]
    AccountNotFound(Uuid),

    #[error("{entity} {id} does not exist")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("account {account_id} does not hold the admin role")]
    Unauthorized { account_id: Uuid },

    #[error("offer {offer_id} is not available")]
    OfferUnavailable { offer_id: Uuid },

    #[error("{entity} {id} was already decided ({status})")]
    AlreadyDecided {
        entity: &'static str,
        id: Uuid,
        status: String,
    },

    #[error("a non-empty reason is required")]
    EmptyReason,

    #[error("invalid amount: {0}")]
    InvalidAmount(&'static str),

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("availability window is inverted")]
    InvalidWindow,

    #[error("adjustment of {amount} points exceeds the cap of {cap}")]
    AdjustmentTooLarge { amount: i64, cap: i64 },

    #[error("account {account_id} already submitted reference {reference:?}")]
    DuplicateReference { account_id: Uuid, reference: String },

    /// The debit committed but the follow-up side effect did not. The
    /// compensating credit was applied; the caller holds no charge.
    #[error("side effect failed after debit, charge was refunded: {0}")]
    SideEffectFailed(#[source] FileStoreError),

    /// Both the side effect and the compensating credit failed. The account
    /// is left debited and needs manual correction.
    #[error("compensation failed, manual correction required (side effect: {side_effect}; compensation: {compensation})")]
    CompensationFailed {
        side_effect: FileStoreError,
        compensation: StoreError,
    },

    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AccountNotFound(id) => LedgerError::AccountNotFound(id),
            StoreError::InsufficientFunds { balance, required } => {
                LedgerError::InsufficientFunds { balance, required }
            }
            StoreError::NotFound { entity, id } => LedgerError::NotFound { entity, id },
            StoreError::AlreadyDecided { entity, id, status } => {
                LedgerError::AlreadyDecided { entity, id, status }
            }
            StoreError::DuplicateReference {
                account_id,
                reference,
            } => LedgerError::DuplicateReference {
                account_id,
                reference,
            },
            other => LedgerError::Store(other),
        }
    }
}
