//! Transfer Error Types
//!
//! Four families, each with a different caller contract:
//!
//! - validation: caller mistake, nothing touched storage
//! - business rule: definitive answer, safe to record for replay
//! - transient: nothing committed, retrying with the same idempotency key is safe
//! - system: unexpected storage failure

use thiserror::Error;

use crate::ledger::{AccountId, StoreError, TransactionId};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransferError {
    // === Validation Errors ===
    #[error("Source and destination account cannot be the same")]
    SameAccount,

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Amount has more than 4 decimal places")]
    PrecisionOverflow,

    #[error("Amount exceeds the ledger's maximum balance")]
    AmountTooLarge,

    // === Business Rule Errors ===
    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Account does not belong to the caller")]
    Unauthorized,

    #[error("Account is not active: {0}")]
    AccountNotActive(AccountId),

    #[error("Currency mismatch: {from} -> {to}")]
    CurrencyMismatch { from: String, to: String },

    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    // === Transient Errors ===
    #[error("Temporarily unavailable, retry: {0}")]
    Transient(String),

    // === System Errors ===
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl TransferError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::SameAccount => "SAME_ACCOUNT",
            TransferError::InvalidAmount => "INVALID_AMOUNT",
            TransferError::PrecisionOverflow => "PRECISION_OVERFLOW",
            TransferError::AmountTooLarge => "AMOUNT_TOO_LARGE",
            TransferError::InsufficientBalance => "INSUFFICIENT_BALANCE",
            TransferError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            TransferError::Unauthorized => "UNAUTHORIZED",
            TransferError::AccountNotActive(_) => "ACCOUNT_NOT_ACTIVE",
            TransferError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            TransferError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            TransferError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            TransferError::Transient(_) => "TRY_AGAIN",
            TransferError::DatabaseError(_) => "DATABASE_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            TransferError::SameAccount
            | TransferError::InvalidAmount
            | TransferError::PrecisionOverflow
            | TransferError::AmountTooLarge => 400,
            TransferError::Unauthorized => 403,
            TransferError::AccountNotFound(_) | TransferError::TransactionNotFound(_) => 404,
            TransferError::InvalidStateTransition(_) => 409,
            TransferError::InsufficientBalance
            | TransferError::AccountNotActive(_)
            | TransferError::CurrencyMismatch { .. } => 422,
            TransferError::DatabaseError(_) => 500,
            TransferError::Transient(_) => 503,
        }
    }

    /// Whether the same request may succeed if sent again unchanged
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferError::Transient(_))
    }
}

impl From<StoreError> for TransferError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => TransferError::Transient(msg),
            other => TransferError::DatabaseError(other.to_string()),
        }
    }
}
