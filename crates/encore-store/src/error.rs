//! Store error taxonomy.
//!
//! Callers react differently to each kind: `Full` needs user-visible
//! remediation, `Corrupt` schedules a rebuild and the store must be
//! dropped, `Reopen` and `Busy` are retryable. Errors never leave a
//! transaction partially applied; SQLite rolls back on drop.

use thiserror::Error;

/// Errors surfaced by the advertisement store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Device storage is exhausted.
    #[error("device storage exhausted")]
    Full,
    /// The database failed integrity checks; close it and schedule a rebuild.
    #[error("advertisement store is corrupt; a rebuild is required")]
    Corrupt,
    /// Transient I/O failure; the caller may close and reopen the store.
    #[error("transient store I/O failure; close and reopen")]
    Reopen,
    /// Another connection holds a conflicting lock; retry after backoff.
    #[error("store is busy; retry after backoff")]
    Busy,
    /// A parameter violated the API contract.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// Bookkeeping or allocation failure inside the store.
    #[error("internal store failure: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match &err {
            rusqlite::Error::SqliteFailure(e, _) => match e.code {
                ErrorCode::DiskFull => StoreError::Full,
                ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => StoreError::Corrupt,
                ErrorCode::SystemIoFailure | ErrorCode::CannotOpen => StoreError::Reopen,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => StoreError::Busy,
                _ => StoreError::Internal(err.to_string()),
            },
            _ => StoreError::Internal(err.to_string()),
        }
    }
}
