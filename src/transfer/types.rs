//! Transfer request types

use rust_decimal::Decimal;
use std::time::Duration;

use crate::ledger::{AccountId, UserId};

/// Two-party movement of funds
///
/// The currency is implied by the source account.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Decimal,
    pub description: Option<String>,
    /// Authenticated caller; when set, must own the source account
    pub initiator: Option<UserId>,
    /// Time allowed to reach commit; the configured default when unset
    pub deadline: Option<Duration>,
}

impl TransferRequest {
    pub fn new(from_account_id: AccountId, to_account_id: AccountId, amount: Decimal) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
            description: None,
            initiator: None,
            deadline: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn initiated_by(mut self, user_id: UserId) -> Self {
        self.initiator = Some(user_id);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Single-leg movement (deposit or withdrawal)
#[derive(Debug, Clone, PartialEq)]
pub struct EntryRequest {
    pub account_id: AccountId,
    pub amount: Decimal,
    pub description: Option<String>,
    pub initiator: Option<UserId>,
    pub deadline: Option<Duration>,
}

impl EntryRequest {
    pub fn new(account_id: AccountId, amount: Decimal) -> Self {
        Self {
            account_id,
            amount,
            description: None,
            initiator: None,
            deadline: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn initiated_by(mut self, user_id: UserId) -> Self {
        self.initiator = Some(user_id);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}
