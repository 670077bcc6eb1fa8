//! In-memory Ledger Store
//!
//! Each account row sits behind its own `tokio::sync::Mutex`; holding the
//! owned guard is the row lock. A [`MemoryLedgerTx`] stages every write and
//! applies them in one step on commit, so readers (which also take the row
//! lock) never observe a debited-but-not-credited state.
//!
//! Transaction records have no row locks of their own. Status changes of a
//! record are serialized by the account locks its legs require.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::error::StoreError;
use super::models::{
    Account, AccountId, AccountUpdate, TransactionFilter, TransactionId, TransactionRecord,
    TransactionStatus, UserId,
};
use super::{
    AccountRepository, DeleteOutcome, LedgerStore, LedgerTx, TransactionRepository, UpdateOutcome,
};

type Row = Arc<Mutex<Account>>;

#[derive(Default)]
struct TxTable {
    by_id: HashMap<TransactionId, TransactionRecord>,
    by_reference: HashMap<String, TransactionId>,
}

#[derive(Default)]
struct Inner {
    accounts: DashMap<AccountId, Row>,
    account_numbers: DashMap<String, AccountId>,
    transactions: RwLock<TxTable>,
}

impl Inner {
    /// Wait for the row lock. `None` if the row does not exist (or was deleted while waiting).
    async fn lock_row(&self, id: AccountId) -> Option<OwnedMutexGuard<Account>> {
        let row = self.accounts.get(&id).map(|r| Arc::clone(r.value()))?;
        let guard = Arc::clone(&row).lock_owned().await;
        match self.accounts.get(&id) {
            Some(current) if Arc::ptr_eq(current.value(), &row) => Some(guard),
            _ => None,
        }
    }
}

fn poisoned() -> StoreError {
    StoreError::Database("transaction table lock poisoned".to_string())
}

/// In-process ledger used for tests and single-node development
#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    inner: Arc<Inner>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of all balances; conservation checks in tests rely on it
    pub async fn total_balance(&self) -> Decimal {
        let rows: Vec<Row> = self
            .inner
            .accounts
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect();
        let mut total = Decimal::ZERO;
        for row in rows {
            total += row.lock().await.balance;
        }
        total
    }

    pub fn transaction_count(&self) -> usize {
        self.inner
            .transactions
            .read()
            .map(|t| t.by_id.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl AccountRepository for MemoryLedgerStore {
    async fn create(&self, account: &Account) -> Result<(), StoreError> {
        if self.inner.accounts.contains_key(&account.id) {
            return Err(StoreError::UniqueViolation(format!(
                "account id {} already exists",
                account.id
            )));
        }
        match self.inner.account_numbers.entry(account.account_number.clone()) {
            Entry::Occupied(_) => {
                return Err(StoreError::UniqueViolation(format!(
                    "account number {} already exists",
                    account.account_number
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(account.id);
            }
        }
        self.inner
            .accounts
            .insert(account.id, Arc::new(Mutex::new(account.clone())));
        Ok(())
    }

    async fn get_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.inner.lock_row(id).await.map(|guard| (*guard).clone()))
    }

    async fn get_by_account_number(
        &self,
        number: &str,
    ) -> Result<Option<Account>, StoreError> {
        let id = match self.inner.account_numbers.get(number) {
            Some(entry) => *entry.value(),
            None => return Ok(None),
        };
        self.get_by_id(id).await
    }

    async fn get_by_user_id(&self, user_id: UserId) -> Result<Vec<Account>, StoreError> {
        let rows: Vec<Row> = self
            .inner
            .accounts
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect();

        let mut accounts = Vec::new();
        for row in rows {
            let account = row.lock().await;
            if account.user_id == user_id {
                accounts.push(account.clone());
            }
        }
        accounts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(accounts)
    }

    async fn update(
        &self,
        id: AccountId,
        update: &AccountUpdate,
    ) -> Result<UpdateOutcome, StoreError> {
        let Some(mut row) = self.inner.lock_row(id).await else {
            return Ok(UpdateOutcome::NotFound);
        };
        let mut account = row.clone();
        if let Err(rejection) = update.apply(&mut account) {
            return Ok(UpdateOutcome::Rejected(rejection));
        }
        account.updated_at = Utc::now();
        *row = account.clone();
        Ok(UpdateOutcome::Updated(account))
    }

    async fn delete(&self, id: AccountId) -> Result<DeleteOutcome, StoreError> {
        let Some(row) = self.inner.lock_row(id).await else {
            return Ok(DeleteOutcome::NotFound);
        };
        if !row.balance.is_zero() {
            return Ok(DeleteOutcome::NotEmpty);
        }
        self.inner.account_numbers.remove(&row.account_number);
        self.inner.accounts.remove(&id);
        Ok(DeleteOutcome::Deleted)
    }
}

#[async_trait]
impl TransactionRepository for MemoryLedgerStore {
    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        let table = self.inner.transactions.read().map_err(|_| poisoned())?;
        Ok(table.by_id.get(&id).cloned())
    }

    async fn get_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        let table = self.inner.transactions.read().map_err(|_| poisoned())?;
        Ok(table
            .by_reference
            .get(reference)
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    async fn list_by_account(
        &self,
        account_id: AccountId,
        filter: TransactionFilter,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let table = self.inner.transactions.read().map_err(|_| poisoned())?;
        let mut records: Vec<TransactionRecord> = table
            .by_id
            .values()
            .filter(|r| r.involves(account_id))
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.reference.cmp(&a.reference))
        });
        Ok(records
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .collect())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError> {
        Ok(Box::new(MemoryLedgerTx {
            inner: Arc::clone(&self.inner),
            locked: HashMap::new(),
            balances: HashMap::new(),
            inserts: Vec::new(),
            status_changes: Vec::new(),
        }))
    }
}

/// Staged unit of work over [`MemoryLedgerStore`]
pub struct MemoryLedgerTx {
    inner: Arc<Inner>,
    locked: HashMap<AccountId, OwnedMutexGuard<Account>>,
    balances: HashMap<AccountId, Decimal>,
    inserts: Vec<TransactionRecord>,
    status_changes: Vec<(TransactionId, TransactionStatus, TransactionStatus)>,
}

impl MemoryLedgerTx {
    fn staged_status(&self, id: TransactionId) -> Option<TransactionStatus> {
        self.status_changes
            .iter()
            .rev()
            .find(|(tx_id, _, _)| *tx_id == id)
            .map(|(_, _, next)| *next)
    }
}

#[async_trait]
impl LedgerTx for MemoryLedgerTx {
    async fn lock_account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError> {
        if let Some(guard) = self.locked.get(&id) {
            let mut account = (**guard).clone();
            if let Some(balance) = self.balances.get(&id) {
                account.balance = *balance;
            }
            return Ok(Some(account));
        }

        let Some(guard) = self.inner.lock_row(id).await else {
            return Ok(None);
        };
        let account = (*guard).clone();
        self.locked.insert(id, guard);
        Ok(Some(account))
    }

    async fn set_balance(&mut self, id: AccountId, balance: Decimal) -> Result<(), StoreError> {
        if !self.locked.contains_key(&id) {
            return Err(StoreError::NotLocked(id.to_string()));
        }
        if balance.is_sign_negative() && !balance.is_zero() {
            return Err(StoreError::Database(format!(
                "balance check constraint violated for account {}",
                id
            )));
        }
        self.balances.insert(id, balance);
        Ok(())
    }

    async fn insert_transaction(&mut self, record: &TransactionRecord) -> Result<(), StoreError> {
        if !record.has_valid_legs() {
            return Err(StoreError::Database(format!(
                "transaction {} has no valid legs for type {}",
                record.id, record.tx_type
            )));
        }
        self.inserts.push(record.clone());
        Ok(())
    }

    async fn lock_transaction(
        &mut self,
        id: TransactionId,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        let staged = self.staged_status(id);
        let table = self.inner.transactions.read().map_err(|_| poisoned())?;
        Ok(table.by_id.get(&id).cloned().map(|mut record| {
            if let Some(status) = staged {
                record.status = status;
            }
            record
        }))
    }

    async fn set_transaction_status(
        &mut self,
        id: TransactionId,
        expected: TransactionStatus,
        next: TransactionStatus,
    ) -> Result<(), StoreError> {
        let current = match self.staged_status(id) {
            Some(status) => Some(status),
            None => {
                let table = self.inner.transactions.read().map_err(|_| poisoned())?;
                table.by_id.get(&id).map(|r| r.status)
            }
        };
        if current != Some(expected) {
            return Err(StoreError::Conflict(format!(
                "transaction {} is not {}",
                id, expected
            )));
        }
        self.status_changes.push((id, expected, next));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryLedgerTx {
            inner,
            mut locked,
            balances,
            inserts,
            status_changes,
        } = *self;

        let mut table = inner.transactions.write().map_err(|_| poisoned())?;

        // Validate everything before touching anything
        for record in &inserts {
            if table.by_id.contains_key(&record.id)
                || table.by_reference.contains_key(&record.reference)
            {
                return Err(StoreError::UniqueViolation(format!(
                    "transaction reference {} already exists",
                    record.reference
                )));
            }
        }
        for (id, expected, _) in &status_changes {
            match table.by_id.get(id) {
                Some(record) if record.status == *expected => {}
                _ => {
                    return Err(StoreError::Conflict(format!(
                        "transaction {} changed concurrently",
                        id
                    )));
                }
            }
        }

        let now = Utc::now();
        for (id, balance) in balances {
            if let Some(row) = locked.get_mut(&id) {
                row.balance = balance;
                row.updated_at = now;
            }
        }
        for record in inserts {
            table.by_reference.insert(record.reference.clone(), record.id);
            table.by_id.insert(record.id, record);
        }
        for (id, _, next) in status_changes {
            if let Some(record) = table.by_id.get_mut(&id) {
                record.status = next;
            }
        }

        drop(table);
        drop(locked);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        // Staged writes are discarded and row guards released on drop
        Ok(())
    }
}
