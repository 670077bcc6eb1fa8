//! Account lifecycle errors

use thiserror::Error;

use super::validation::ValidationError;
use crate::ledger::{AccountId, StoreError, UserId};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AccountError {
    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Account does not belong to the caller")]
    Unauthorized,

    #[error("Account balance must be zero")]
    AccountNotEmpty,

    #[error("Invalid status change: {0}")]
    InvalidTransition(String),

    #[error("Could not allocate a unique account number")]
    NumberExhausted,

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl AccountError {
    pub fn code(&self) -> &'static str {
        match self {
            AccountError::Invalid(_) => "INVALID_PARAMETER",
            AccountError::UserNotFound(_) => "USER_NOT_FOUND",
            AccountError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            AccountError::Unauthorized => "UNAUTHORIZED",
            AccountError::AccountNotEmpty => "ACCOUNT_NOT_EMPTY",
            AccountError::InvalidTransition(_) => "INVALID_STATE_TRANSITION",
            AccountError::NumberExhausted => "TRY_AGAIN",
            AccountError::DatabaseError(_) => "DATABASE_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            AccountError::Invalid(_) => 400,
            AccountError::Unauthorized => 403,
            AccountError::UserNotFound(_) | AccountError::AccountNotFound(_) => 404,
            AccountError::InvalidTransition(_) => 409,
            AccountError::AccountNotEmpty => 422,
            AccountError::DatabaseError(_) => 500,
            AccountError::NumberExhausted => 503,
        }
    }

    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, AccountError::NumberExhausted)
    }
}

impl From<StoreError> for AccountError {
    fn from(e: StoreError) -> Self {
        AccountError::DatabaseError(e.to_string())
    }
}

impl From<ValidationError> for AccountError {
    fn from(e: ValidationError) -> Self {
        AccountError::Invalid(e.to_string())
    }
}
