pub mod error;
pub mod sqlite_audit;
pub mod sqlite_store;

pub use error::{Result, StoreError};
pub use sqlite_audit::{AuditEntry, AuditLog, Operation};
pub use sqlite_store::{SqliteStore, TransactionOps};
