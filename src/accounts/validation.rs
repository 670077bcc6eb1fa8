//! Validated account inputs
//!
//! Fields are private to force construction through the checked constructors.

use rand::Rng;
use std::fmt;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("Invalid currency '{0}' (expected a 3-letter ISO 4217 code)")]
    InvalidCurrency(String),

    #[error("Invalid account number '{0}' (expected 10 digits)")]
    InvalidAccountNumber(String),
}

/// Digits in a generated account number
pub const ACCOUNT_NUMBER_DIGITS: usize = 10;

/// ISO 4217 alphabetic code, always uppercase
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// Accepts any case, stores uppercase. `"usd"` becomes `"USD"`.
    pub fn new(code: &str) -> Result<Self, ValidationError> {
        let code = code.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::InvalidCurrency(code.to_string()));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Zero-padded decimal account number
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountNumber(String);

impl AccountNumber {
    /// Random number; uniqueness is enforced by the store's unique index
    pub fn generate() -> Self {
        let n: u64 = rand::thread_rng().gen_range(0..10u64.pow(ACCOUNT_NUMBER_DIGITS as u32));
        Self(format!("{:0width$}", n, width = ACCOUNT_NUMBER_DIGITS))
    }

    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        if s.len() != ACCOUNT_NUMBER_DIGITS || !s.chars().all(|c| c.is_ascii_digit()) {
            return Err(ValidationError::InvalidAccountNumber(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}
