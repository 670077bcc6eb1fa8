//! Account Ledger Store
//!
//! The single source of truth for balances. Two capability interfaces cover
//! plain reads and non-monetary writes ([`AccountRepository`],
//! [`TransactionRepository`]); balance mutation is only reachable through a
//! [`LedgerTx`] opened by [`LedgerStore::begin`].
//!
//! # Implementations
//!
//! - [`PgLedgerStore`] - PostgreSQL, serializable transactions, `SELECT ... FOR UPDATE`
//! - [`MemoryLedgerStore`] - in-process, per-row async mutexes standing in for row locks
//!
//! # Locking contract
//!
//! [`LedgerTx::lock_account`] blocks until the row lock is granted and holds it
//! until commit or rollback. Callers locking more than one row MUST lock in
//! ascending [`AccountId`] order (see [`lock_order`]).

pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;

pub use error::StoreError;
pub use memory::MemoryLedgerStore;
pub use models::{
    Account, AccountId, AccountStatus, AccountType, AccountUpdate, TransactionFilter,
    TransactionId, TransactionRecord, TransactionStatus, TransactionType, UpdateRejection, UserId,
};
pub use postgres::PgLedgerStore;

use async_trait::async_trait;
use rust_decimal::Decimal;

/// Outcome of a guarded account deletion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    /// Balance was not exactly zero; nothing removed
    NotEmpty,
}

/// Outcome of an [`AccountUpdate`] applied under the row lock
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// The row as stored after the update
    Updated(Account),
    NotFound,
    Rejected(UpdateRejection),
}

/// Account persistence capability
///
/// Implemented by the stores directly and by the cached decorator in
/// [`crate::cache`]. None of these methods can change a balance.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Insert a new account. Fails with `UniqueViolation` on a taken account number.
    async fn create(&self, account: &Account) -> Result<(), StoreError>;

    async fn get_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    async fn get_by_account_number(&self, number: &str)
    -> Result<Option<Account>, StoreError>;

    /// All accounts of a user, newest first
    async fn get_by_user_id(&self, user_id: UserId) -> Result<Vec<Account>, StoreError>;

    /// Apply `update` to the locked row; the closing balance check sees the committed balance
    async fn update(&self, id: AccountId, update: &AccountUpdate)
    -> Result<UpdateOutcome, StoreError>;

    /// Physically delete an account whose balance is exactly zero
    async fn delete(&self, id: AccountId) -> Result<DeleteOutcome, StoreError>;
}

/// Transaction history capability (read-only outside [`LedgerTx`])
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<TransactionRecord>, StoreError>;

    async fn get_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<TransactionRecord>, StoreError>;

    /// Records touching `account_id` on either leg, newest first
    async fn list_by_account(
        &self,
        account_id: AccountId,
        filter: TransactionFilter,
    ) -> Result<Vec<TransactionRecord>, StoreError>;
}

/// Transactional ledger: the only writer of balances
#[async_trait]
pub trait LedgerStore: AccountRepository + TransactionRepository {
    fn name(&self) -> &'static str;

    /// Open a serializable unit of work
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError>;
}

/// One serializable unit of work over the ledger
///
/// Dropping without [`commit`](LedgerTx::commit) rolls back and releases every lock.
#[async_trait]
pub trait LedgerTx: Send {
    /// Acquire the exclusive row lock and return the row as seen under it
    async fn lock_account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// Stage a new balance for a row locked by this transaction
    async fn set_balance(&mut self, id: AccountId, balance: Decimal) -> Result<(), StoreError>;

    async fn insert_transaction(&mut self, record: &TransactionRecord) -> Result<(), StoreError>;

    /// Read a transaction record for update
    async fn lock_transaction(
        &mut self,
        id: TransactionId,
    ) -> Result<Option<TransactionRecord>, StoreError>;

    /// Compare-and-set the status of a record
    async fn set_transaction_status(
        &mut self,
        id: TransactionId,
        expected: TransactionStatus,
        next: TransactionStatus,
    ) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Canonical lock order for a pair of accounts, independent of transfer direction
#[inline]
pub fn lock_order(a: AccountId, b: AccountId) -> [AccountId; 2] {
    if a <= b { [a, b] } else { [b, a] }
}
