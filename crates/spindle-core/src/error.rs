//! Error taxonomy.
//!
//! Execution-time failures are not errors at this level: the supervisor turns
//! them into [`Outcome::Failure`](crate::domain::Outcome) and the store records
//! them. What remains are submission rejections and store failures.

use std::fmt;

use thiserror::Error;

/// One rejected parameter.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FieldError {
    pub field: String,
    pub reason: String,
}

/// Parameters rejected by a validator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

impl ValidationError {
    pub fn new(errors: Vec<FieldError>) -> Self {
        Self { errors }
    }

    pub fn single(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            errors: vec![FieldError {
                field: field.into(),
                reason: reason.into(),
            }],
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid parameters")?;
        for (i, e) in self.errors.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{}: {}", e.field, e.reason)?;
        }
        Ok(())
    }
}

/// Failures of the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection-level failure. Workers back off and retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),

    /// A persisted row could not be mapped back into a task record.
    #[error("corrupt task row: {0}")]
    Corrupt(String),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Database(sqlx::Error::Database(db)) => {
                // SQLite busy/locked, Postgres serialization/deadlock.
                matches!(db.code().as_deref(), Some("5" | "6" | "40001" | "40P01"))
            }
            _ => false,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(e) => StoreError::Unavailable(e.to_string()),
            sqlx::Error::Tls(e) => StoreError::Unavailable(e.to_string()),
            sqlx::Error::PoolTimedOut => StoreError::Unavailable("connection pool timed out".into()),
            sqlx::Error::PoolClosed => StoreError::Unavailable("connection pool closed".into()),
            other => StoreError::Database(other),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

/// Synchronous rejection of a submission. Rejected tasks are never persisted,
/// except for `Store`, where persistence itself failed.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("unknown task '{0}'")]
    UnknownTask(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("could not encode parameters: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SubmitError {
    /// Rejections that happen before anything reaches the store.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            SubmitError::UnknownTask(_) | SubmitError::Validation(_) | SubmitError::Encode(_)
        )
    }
}
