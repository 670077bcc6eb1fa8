//! Ledger data model
//!
//! Accounts and transaction records as stored in the ledger of record.
//! Money is always `rust_decimal::Decimal`; nothing here touches floats.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type AccountId = Uuid;
pub type UserId = Uuid;
pub type TransactionId = Uuid;

/// Maximum fractional digits the ledger stores (`NUMERIC(20, 4)`)
pub const AMOUNT_SCALE: u32 = 4;

/// Default and maximum page size for transaction history
pub const DEFAULT_PAGE_LIMIT: i64 = 50;
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Returned by `FromStr` on the string-backed enums below
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $s,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok($name::$variant),)+
                    _ => Err(ParseEnumError {
                        kind: $kind,
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Savings,
    Checking,
    Deposit,
}

string_enum!(AccountType, "account type", {
    Savings => "savings",
    Checking => "checking",
    Deposit => "deposit",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Inactive,
    Frozen,
    Closed,
}

string_enum!(AccountStatus, "account status", {
    Active => "active",
    Inactive => "inactive",
    Frozen => "frozen",
    Closed => "closed",
});

/// Bank account as held in the ledger of record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub user_id: UserId,
    pub account_number: String,
    pub account_type: AccountType,
    pub balance: Decimal,
    pub currency: String,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// A freshly opened account: zero balance, active
    pub fn open(
        user_id: UserId,
        account_number: String,
        account_type: AccountType,
        currency: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            account_number,
            account_type,
            balance: Decimal::ZERO,
            currency: currency.to_ascii_uppercase(),
            status: AccountStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}

/// Requested change to an account's type and/or status
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountUpdate {
    pub account_type: Option<AccountType>,
    pub status: Option<AccountStatus>,
}

/// Why a store refused an [`AccountUpdate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateRejection {
    /// Closing requires an exactly zero balance
    NotEmpty,
    /// Closed is terminal; carries the status that was asked for
    Closed(AccountStatus),
}

impl AccountUpdate {
    /// Apply to a row the caller holds locked.
    /// The balance check is only meaningful under that lock.
    pub fn apply(&self, account: &mut Account) -> Result<(), UpdateRejection> {
        if let Some(status) = self.status {
            if account.status == AccountStatus::Closed && status != AccountStatus::Closed {
                return Err(UpdateRejection::Closed(status));
            }
            if status == AccountStatus::Closed && !account.balance.is_zero() {
                return Err(UpdateRejection::NotEmpty);
            }
            account.status = status;
        }
        if let Some(account_type) = self.account_type {
            account.account_type = account_type;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Transfer,
    Deposit,
    Withdrawal,
    Payment,
}

string_enum!(TransactionType, "transaction type", {
    Transfer => "transfer",
    Deposit => "deposit",
    Withdrawal => "withdrawal",
    Payment => "payment",
});

/// Transaction record lifecycle
///
/// ```text
/// PENDING → COMPLETED → REVERSED
///        ↘ FAILED
/// ```
///
/// `completed` and `failed` are final except for the single
/// `completed → reversed` transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Reversed,
}

string_enum!(TransactionStatus, "transaction status", {
    Pending => "pending",
    Completed => "completed",
    Failed => "failed",
    Reversed => "reversed",
});

impl TransactionStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Completed) | (Pending, Failed) | (Completed, Reversed)
        )
    }
}

/// Immutable record of a ledger movement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TransactionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_account_id: Option<AccountId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_account_id: Option<AccountId>,
    pub amount: Decimal,
    pub currency: String,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub status: TransactionStatus,
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TransactionRecord {
    /// Build a completed record. The leg shape (`from`/`to`) follows `tx_type`.
    pub fn completed(
        tx_type: TransactionType,
        from_account_id: Option<AccountId>,
        to_account_id: Option<AccountId>,
        amount: Decimal,
        currency: &str,
        description: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            from_account_id,
            to_account_id,
            amount,
            currency: currency.to_string(),
            tx_type,
            status: TransactionStatus::Completed,
            reference: new_reference(),
            description,
            metadata: None,
            created_at: now,
            completed_at: Some(now),
        }
    }

    /// Whether this record touches the given account on either leg
    pub fn involves(&self, account_id: AccountId) -> bool {
        self.from_account_id == Some(account_id) || self.to_account_id == Some(account_id)
    }

    /// Leg shape check: transfer has both, deposit only `to`, withdrawal only `from`
    pub fn has_valid_legs(&self) -> bool {
        match self.tx_type {
            TransactionType::Transfer => {
                self.from_account_id.is_some() && self.to_account_id.is_some()
            }
            TransactionType::Deposit => {
                self.from_account_id.is_none() && self.to_account_id.is_some()
            }
            TransactionType::Withdrawal => {
                self.from_account_id.is_some() && self.to_account_id.is_none()
            }
            TransactionType::Payment => {
                self.from_account_id.is_some() || self.to_account_id.is_some()
            }
        }
    }
}

/// Globally unique, externally quotable transaction reference
pub fn new_reference() -> String {
    format!("TXN{}", ulid::Ulid::new())
}

/// Paging for transaction history (newest first)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionFilter {
    pub limit: i64,
    pub offset: i64,
}

impl Default for TransactionFilter {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl TransactionFilter {
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        let limit = match limit {
            Some(l) if l > 0 => l.min(MAX_PAGE_LIMIT),
            _ => DEFAULT_PAGE_LIMIT,
        };
        Self {
            limit,
            offset: offset.unwrap_or(0).max(0),
        }
    }

    /// The "recent transactions" view served from cache
    pub fn is_recent_page(&self) -> bool {
        *self == Self::default()
    }
}
