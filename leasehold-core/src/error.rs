//! Error types for lease coordination.

use thiserror::Error;

/// Result type for repository, handler and client operations.
pub type LockResult<T> = Result<T, LockError>;

/// Result type for lease store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the coordination verbs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Another owner already holds the key.
    #[error("lock collision")]
    LockCollision,

    /// The key is absent or logically unheld.
    #[error("resource not found")]
    ResourceNotFound,

    #[error("invalid ttl")]
    InvalidTtl,

    #[error("invalid owner")]
    InvalidOwner,

    #[error("invalid type")]
    InvalidType,

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Transport failure between a lock client and the server.
    #[error("transport error: {0}")]
    Transport(String),
}

impl LockError {
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, LockError::Store(StoreError::Unrecoverable(_)))
    }
}

/// Errors raised by a [`LeaseStore`](crate::infrastructure::LeaseStore) backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Transient contention; the transaction may be retried.
    #[error("store busy: {0}")]
    Busy(String),

    /// The store can no longer serve requests (e.g. the table is gone).
    #[error("unrecoverable store error: {0}")]
    Unrecoverable(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
            {
                StoreError::Busy(err.to_string())
            }
            rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("no such table") => {
                StoreError::Unrecoverable(err.to_string())
            }
            _ => StoreError::Backend(err.to_string()),
        }
    }
}
