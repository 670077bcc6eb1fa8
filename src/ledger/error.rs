//! Storage error classification
//!
//! Every store (ledger, idempotency) reports failures through [`StoreError`].
//! PostgreSQL errors are classified by SQLSTATE so callers can tell a
//! retryable concurrency conflict from a definitive failure.

use thiserror::Error;

/// serialization_failure
const SQLSTATE_SERIALIZATION_FAILURE: &str = "40001";
/// deadlock_detected
const SQLSTATE_DEADLOCK_DETECTED: &str = "40P01";
/// lock_not_available (lock_timeout)
const SQLSTATE_LOCK_NOT_AVAILABLE: &str = "55P03";

#[derive(Error, Debug)]
pub enum StoreError {
    /// Concurrency conflict; re-running the whole transaction may succeed
    #[error("Storage conflict: {0}")]
    Conflict(String),

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    /// Row content that cannot be mapped back to the domain model
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// Write attempted on a row the transaction does not hold a lock on
    #[error("Row not locked by this transaction: {0}")]
    NotLocked(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    #[inline]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    #[inline]
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &e {
            if db_err.is_unique_violation() {
                return StoreError::UniqueViolation(db_err.message().to_string());
            }
            if let Some(code) = db_err.code() {
                match code.as_ref() {
                    SQLSTATE_SERIALIZATION_FAILURE
                    | SQLSTATE_DEADLOCK_DETECTED
                    | SQLSTATE_LOCK_NOT_AVAILABLE => {
                        return StoreError::Conflict(format!("{} ({})", db_err.message(), code));
                    }
                    _ => {}
                }
            }
        }
        match e {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) => {
                StoreError::Corrupt(e.to_string())
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

impl From<super::models::ParseEnumError> for StoreError {
    fn from(e: super::models::ParseEnumError) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}
