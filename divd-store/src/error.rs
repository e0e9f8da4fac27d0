//! Store Error Types

use thiserror::Error;

/// Errors surfaced by the store gateway.
///
/// Callers may retry `Transient`; the other variants are deterministic.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Retryable infrastructure failure
    #[error("Transient store error: {0}")]
    Transient(String),

    /// State conflict, e.g. cancelling a non-pending job
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Row not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Input rejected by a store-level invariant
    #[error("Invalid: {0}")]
    Invalid(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// Whether a retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound(err.to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(err.to_string())
            }
            _ => StoreError::Transient(err.to_string()),
        }
    }
}
