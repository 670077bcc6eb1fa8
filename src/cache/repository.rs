//! Cached repository decorators
//!
//! Same traits as the stores they wrap. Reads go cache-first; writes go to the
//! wrapped store and invalidate afterwards, only when the write succeeded.

use async_trait::async_trait;
use std::sync::Arc;

use super::LedgerCache;
use crate::ledger::{
    Account, AccountId, AccountRepository, AccountUpdate, DeleteOutcome, StoreError,
    TransactionFilter, TransactionId, TransactionRecord, TransactionRepository, UpdateOutcome,
    UserId,
};

pub struct CachedAccountRepository {
    inner: Arc<dyn AccountRepository>,
    cache: LedgerCache,
}

impl CachedAccountRepository {
    pub fn new(inner: Arc<dyn AccountRepository>, cache: LedgerCache) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl AccountRepository for CachedAccountRepository {
    async fn create(&self, account: &Account) -> Result<(), StoreError> {
        self.inner.create(account).await?;
        self.cache.invalidate_account(account.id).await;
        Ok(())
    }

    async fn get_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        if let Some(account) = self.cache.get_account(id).await {
            tracing::debug!(account_id = %id, "[cache] account hit");
            return Ok(Some(account));
        }

        let account = self.inner.get_by_id(id).await?;
        if let Some(account) = &account {
            self.cache.put_account(account).await;
        }
        Ok(account)
    }

    async fn get_by_account_number(
        &self,
        number: &str,
    ) -> Result<Option<Account>, StoreError> {
        self.inner.get_by_account_number(number).await
    }

    async fn get_by_user_id(&self, user_id: UserId) -> Result<Vec<Account>, StoreError> {
        self.inner.get_by_user_id(user_id).await
    }

    async fn update(
        &self,
        id: AccountId,
        update: &AccountUpdate,
    ) -> Result<UpdateOutcome, StoreError> {
        let outcome = self.inner.update(id, update).await?;
        if matches!(outcome, UpdateOutcome::Updated(_)) {
            self.cache.invalidate_account(id).await;
        }
        Ok(outcome)
    }

    async fn delete(&self, id: AccountId) -> Result<DeleteOutcome, StoreError> {
        let outcome = self.inner.delete(id).await?;
        if outcome == DeleteOutcome::Deleted {
            self.cache.invalidate_account(id).await;
        }
        Ok(outcome)
    }
}

pub struct CachedTransactionRepository {
    inner: Arc<dyn TransactionRepository>,
    cache: LedgerCache,
}

impl CachedTransactionRepository {
    pub fn new(inner: Arc<dyn TransactionRepository>, cache: LedgerCache) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl TransactionRepository for CachedTransactionRepository {
    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        self.inner.get_transaction(id).await
    }

    async fn get_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        self.inner.get_by_reference(reference).await
    }

    async fn list_by_account(
        &self,
        account_id: AccountId,
        filter: TransactionFilter,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        if !filter.is_recent_page() {
            return self.inner.list_by_account(account_id, filter).await;
        }

        if let Some(records) = self.cache.get_recent_transactions(account_id).await {
            return Ok(records);
        }
        let records = self.inner.list_by_account(account_id, filter).await?;
        self.cache
            .put_recent_transactions(account_id, &records)
            .await;
        Ok(records)
    }
}
