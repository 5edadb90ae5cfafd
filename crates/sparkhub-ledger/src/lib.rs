pub mod engine;
pub mod error;
pub mod files;
pub mod memory;
pub mod postgres;
pub mod pricing;
pub mod tier;

pub use engine::{AdminActor, Ledger, LedgerPolicy, NewTopUp, NewUpload, Receipt, Ruling};
pub use error::LedgerError;
pub use files::{FileStore, FileStoreError, LocalFileStore};
pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;
