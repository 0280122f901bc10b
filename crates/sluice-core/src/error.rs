//! The transfer error taxonomy.
//!
//! Every fallible core operation surfaces a [`TransferError`]. The variants
//! map one-to-one to recovery policies: duplicates are counted and never
//! propagate past the row loop, connection-class errors are retried and
//! eventually routed to the retry queue, everything else fails the run.

use thiserror::Error;
use uuid::Uuid;

/// Error surfaced by the transfer core.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("task {0} not found")]
    TaskNotFound(Uuid),

    #[error("task {0} is not active")]
    TaskInactive(Uuid),

    #[error("task {0} has no usable validation ruleset")]
    RuleMissing(Uuid),

    #[error("task {0} is already running")]
    AlreadyRunning(Uuid),

    #[error("validation failed for field {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Insert hit a unique constraint. Accounted as a duplicate, never fatal.
    #[error("duplicate key {key}")]
    Duplicate { key: String },

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("server {0} unavailable")]
    Unavailable(String),

    #[error("cancelled")]
    Cancelled,

    /// The post-transfer source update failed. Logged; the run still counts
    /// as successful.
    #[error("post-transfer update failed: {0}")]
    PostUpdate(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TransferError {
    /// Whether this failure is connection-class: eligible for in-phase
    /// reconnects, task-level retries, and the retry queue.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost(_) | Self::Timeout(_) | Self::Unavailable(_)
        )
    }
}

/// SQLSTATE class for connection exceptions.
const SQLSTATE_CONNECTION_CLASS: &str = "08";
/// SQLSTATE for a unique-constraint violation.
const SQLSTATE_UNIQUE_VIOLATION: &str = "23505";
/// SQLSTATE for a statement cancelled by `statement_timeout`.
const SQLSTATE_QUERY_CANCELED: &str = "57014";
/// SQLSTATE for admin shutdown / crash shutdown, seen when the server goes
/// away under us.
const SQLSTATE_SHUTDOWN: &[&str] = &["57P01", "57P02", "57P03"];

/// Classify a driver error into the transfer taxonomy.
///
/// `key` is the merge-key string of the row being written, used to label
/// `Duplicate` failures; pass an empty string outside the insert path.
pub fn classify_sqlx(err: sqlx::Error, key: &str) -> TransferError {
    match &err {
        sqlx::Error::Database(db) => {
            if let Some(code) = db.code() {
                let code = code.as_ref();
                if code == SQLSTATE_UNIQUE_VIOLATION {
                    return TransferError::Duplicate {
                        key: key.to_owned(),
                    };
                }
                if code == SQLSTATE_QUERY_CANCELED {
                    return TransferError::Timeout(db.message().to_owned());
                }
                if code.starts_with(SQLSTATE_CONNECTION_CLASS)
                    || SQLSTATE_SHUTDOWN.contains(&code)
                {
                    return TransferError::ConnectionLost(db.message().to_owned());
                }
            }
            TransferError::Other(err.into())
        }
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::Protocol(_) => {
            TransferError::ConnectionLost(err.to_string())
        }
        sqlx::Error::PoolTimedOut => TransferError::Timeout("pool acquire timed out".to_owned()),
        sqlx::Error::PoolClosed => TransferError::ConnectionLost("pool closed".to_owned()),
        _ => TransferError::Other(err.into()),
    }
}
