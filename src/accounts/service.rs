//! Account lifecycle
//!
//! Opening, reading, updating and closing accounts. Nothing here can move
//! money; balances change only through the transfer orchestrator.

use std::sync::Arc;
use tracing::{info, warn};

use super::directory::UserDirectory;
use super::error::AccountError;
use super::validation::{AccountNumber, CurrencyCode};
use crate::ledger::{
    Account, AccountId, AccountRepository, AccountType, AccountUpdate, DeleteOutcome,
    UpdateOutcome, UpdateRejection, UserId,
};

/// Attempts at drawing an unused account number
const NUMBER_ATTEMPTS: usize = 5;

pub struct AccountService {
    /// Uncached store; balance-sensitive checks read through it
    store: Arc<dyn AccountRepository>,
    /// Cached decorator over `store`; every write goes through it so the cache is invalidated
    cached: Arc<dyn AccountRepository>,
    directory: Arc<dyn UserDirectory>,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn AccountRepository>,
        cached: Arc<dyn AccountRepository>,
        directory: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            store,
            cached,
            directory,
        }
    }

    pub async fn open_account(
        &self,
        user_id: UserId,
        account_type: AccountType,
        currency: &str,
    ) -> Result<Account, AccountError> {
        let currency = CurrencyCode::new(currency)?;
        if !self.directory.user_exists(user_id).await? {
            return Err(AccountError::UserNotFound(user_id));
        }

        for attempt in 1..=NUMBER_ATTEMPTS {
            let number = AccountNumber::generate();
            let account = Account::open(
                user_id,
                number.into_string(),
                account_type,
                currency.as_str(),
            );
            match self.cached.create(&account).await {
                Ok(()) => {
                    info!(
                        account_id = %account.id,
                        user_id = %user_id,
                        account_type = %account.account_type,
                        currency = %account.currency,
                        "Account opened"
                    );
                    return Ok(account);
                }
                Err(e) if e.is_unique_violation() => {
                    warn!(attempt, "Account number collision, drawing another");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(AccountError::NumberExhausted)
    }

    pub async fn get_account(&self, user_id: UserId, id: AccountId) -> Result<Account, AccountError> {
        let account = self
            .cached
            .get_by_id(id)
            .await?
            .ok_or(AccountError::AccountNotFound(id))?;
        if account.user_id != user_id {
            return Err(AccountError::Unauthorized);
        }
        Ok(account)
    }

    /// Newest first, straight from the store
    pub async fn list_accounts(&self, user_id: UserId) -> Result<Vec<Account>, AccountError> {
        Ok(self.store.get_by_user_id(user_id).await?)
    }

    /// Change type and/or status. The store applies the change under the row
    /// lock, so a close cannot slip past a concurrently committing credit.
    pub async fn update_account(
        &self,
        user_id: UserId,
        id: AccountId,
        update: AccountUpdate,
    ) -> Result<Account, AccountError> {
        self.owned_fresh(user_id, id).await?;

        match self.cached.update(id, &update).await? {
            UpdateOutcome::Updated(account) => {
                info!(account_id = %id, status = %account.status, account_type = %account.account_type, "Account updated");
                Ok(account)
            }
            UpdateOutcome::NotFound => Err(AccountError::AccountNotFound(id)),
            UpdateOutcome::Rejected(UpdateRejection::NotEmpty) => Err(AccountError::AccountNotEmpty),
            UpdateOutcome::Rejected(UpdateRejection::Closed(status)) => Err(
                AccountError::InvalidTransition(format!("closed account cannot become {}", status)),
            ),
        }
    }

    /// Delete an account whose balance is exactly zero
    pub async fn close_account(&self, user_id: UserId, id: AccountId) -> Result<(), AccountError> {
        self.owned_fresh(user_id, id).await?;

        match self.cached.delete(id).await? {
            DeleteOutcome::Deleted => {
                info!(account_id = %id, "Account closed");
                Ok(())
            }
            DeleteOutcome::NotEmpty => Err(AccountError::AccountNotEmpty),
            DeleteOutcome::NotFound => Err(AccountError::AccountNotFound(id)),
        }
    }

    async fn owned_fresh(&self, user_id: UserId, id: AccountId) -> Result<Account, AccountError> {
        let account = self
            .store
            .get_by_id(id)
            .await?
            .ok_or(AccountError::AccountNotFound(id))?;
        if account.user_id != user_id {
            return Err(AccountError::Unauthorized);
        }
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::directory::{StaticUserDirectory, TrustedProxyDirectory};
    use crate::cache::{CachedAccountRepository, LedgerCache};
    use crate::ledger::{AccountStatus, LedgerStore, MemoryLedgerStore, StoreError};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};
    use uuid::Uuid;

    /// Direct-read store that commits a credit right after the service's
    /// ownership read, the way a concurrent deposit would
    struct CreditAfterRead {
        inner: MemoryLedgerStore,
        armed: AtomicBool,
    }

    #[async_trait]
    impl AccountRepository for CreditAfterRead {
        async fn create(&self, account: &Account) -> Result<(), StoreError> {
            self.inner.create(account).await
        }
        async fn get_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
            let account = self.inner.get_by_id(id).await?;
            if self.armed.swap(false, Ordering::SeqCst) {
                fund(&self.inner, id, dec!(50)).await;
            }
            Ok(account)
        }
        async fn get_by_account_number(&self, n: &str) -> Result<Option<Account>, StoreError> {
            self.inner.get_by_account_number(n).await
        }
        async fn get_by_user_id(&self, user_id: UserId) -> Result<Vec<Account>, StoreError> {
            self.inner.get_by_user_id(user_id).await
        }
        async fn update(
            &self,
            id: AccountId,
            update: &AccountUpdate,
        ) -> Result<UpdateOutcome, StoreError> {
            self.inner.update(id, update).await
        }
        async fn delete(&self, id: AccountId) -> Result<DeleteOutcome, StoreError> {
            self.inner.delete(id).await
        }
    }

    fn service(store: &MemoryLedgerStore, directory: Arc<dyn UserDirectory>) -> AccountService {
        let direct: Arc<dyn AccountRepository> = Arc::new(store.clone());
        let cached = Arc::new(CachedAccountRepository::new(
            direct.clone(),
            LedgerCache::in_memory(),
        ));
        AccountService::new(direct, cached, directory)
    }

    async fn fund(store: &MemoryLedgerStore, id: AccountId, amount: rust_decimal::Decimal) {
        let mut tx = store.begin().await.unwrap();
        tx.lock_account(id).await.unwrap();
        tx.set_balance(id, amount).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_account_defaults() {
        let store = MemoryLedgerStore::new();
        let svc = service(&store, Arc::new(TrustedProxyDirectory));
        let user = Uuid::new_v4();

        let account = svc
            .open_account(user, AccountType::Savings, "usd")
            .await
            .unwrap();
        assert_eq!(account.balance, dec!(0));
        assert_eq!(account.currency, "USD");
        assert_eq!(account.status, AccountStatus::Active);
        assert_eq!(account.account_number.len(), 10);
        assert_eq!(svc.get_account(user, account.id).await.unwrap().user_id, user);
    }

    #[tokio::test]
    async fn test_open_requires_known_user_and_valid_currency() {
        let store = MemoryLedgerStore::new();
        let known = Uuid::new_v4();
        let svc = service(&store, Arc::new(StaticUserDirectory::new([known])));

        let err = svc
            .open_account(Uuid::new_v4(), AccountType::Checking, "USD")
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::UserNotFound(_)));

        let err = svc
            .open_account(known, AccountType::Checking, "DOLLARS")
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_other_users_cannot_read_or_close() {
        let store = MemoryLedgerStore::new();
        let svc = service(&store, Arc::new(TrustedProxyDirectory));
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let account = svc
            .open_account(owner, AccountType::Checking, "USD")
            .await
            .unwrap();

        assert_eq!(
            svc.get_account(stranger, account.id).await.unwrap_err(),
            AccountError::Unauthorized
        );
        assert_eq!(
            svc.close_account(stranger, account.id).await.unwrap_err(),
            AccountError::Unauthorized
        );
    }

    #[tokio::test]
    async fn test_close_requires_zero_balance() {
        let store = MemoryLedgerStore::new();
        let svc = service(&store, Arc::new(TrustedProxyDirectory));
        let user = Uuid::new_v4();
        let account = svc
            .open_account(user, AccountType::Checking, "USD")
            .await
            .unwrap();
        fund(&store, account.id, dec!(0.0001)).await;

        assert_eq!(
            svc.close_account(user, account.id).await.unwrap_err(),
            AccountError::AccountNotEmpty
        );
        let err = svc
            .update_account(
                user,
                account.id,
                AccountUpdate {
                    status: Some(AccountStatus::Closed),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err, AccountError::AccountNotEmpty);

        fund(&store, account.id, dec!(0)).await;
        svc.close_account(user, account.id).await.unwrap();
        assert_eq!(
            svc.get_account(user, account.id).await.unwrap_err(),
            AccountError::AccountNotFound(account.id)
        );
    }

    #[tokio::test]
    async fn test_update_keeps_balance_and_refreshes_cache() {
        let store = MemoryLedgerStore::new();
        let svc = service(&store, Arc::new(TrustedProxyDirectory));
        let user = Uuid::new_v4();
        let account = svc
            .open_account(user, AccountType::Checking, "USD")
            .await
            .unwrap();
        // Populate the cache, then move money underneath it
        svc.get_account(user, account.id).await.unwrap();
        fund(&store, account.id, dec!(25)).await;

        let updated = svc
            .update_account(
                user,
                account.id,
                AccountUpdate {
                    account_type: Some(AccountType::Savings),
                    status: Some(AccountStatus::Frozen),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.balance, dec!(25));
        assert_eq!(updated.account_type, AccountType::Savings);

        let read = svc.get_account(user, account.id).await.unwrap();
        assert_eq!(read.status, AccountStatus::Frozen);
        assert_eq!(read.balance, dec!(25));
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let store = MemoryLedgerStore::new();
        let svc = service(&store, Arc::new(TrustedProxyDirectory));
        let user = Uuid::new_v4();
        let first = svc.open_account(user, AccountType::Checking, "USD").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = svc.open_account(user, AccountType::Savings, "USD").await.unwrap();
        svc.open_account(Uuid::new_v4(), AccountType::Savings, "USD").await.unwrap();

        let listed = svc.list_accounts(user).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn test_close_sees_credit_committed_after_read() {
        let store = MemoryLedgerStore::new();
        let user = Uuid::new_v4();
        let account = service(&store, Arc::new(TrustedProxyDirectory))
            .open_account(user, AccountType::Checking, "USD")
            .await
            .unwrap();

        let racing = Arc::new(CreditAfterRead {
            inner: store.clone(),
            armed: AtomicBool::new(true),
        });
        let cached = Arc::new(CachedAccountRepository::new(
            Arc::new(store.clone()),
            LedgerCache::in_memory(),
        ));
        let svc = AccountService::new(racing, cached, Arc::new(TrustedProxyDirectory));

        let err = svc
            .update_account(
                user,
                account.id,
                AccountUpdate {
                    status: Some(AccountStatus::Closed),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err, AccountError::AccountNotEmpty);

        let stored = store.get_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AccountStatus::Active);
        assert_eq!(stored.balance, dec!(50));
    }

    #[tokio::test]
    async fn test_closed_account_cannot_reopen() {
        let store = MemoryLedgerStore::new();
        let svc = service(&store, Arc::new(TrustedProxyDirectory));
        let user = Uuid::new_v4();
        let account = svc
            .open_account(user, AccountType::Checking, "USD")
            .await
            .unwrap();

        let closed = svc
            .update_account(
                user,
                account.id,
                AccountUpdate {
                    status: Some(AccountStatus::Closed),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(closed.status, AccountStatus::Closed);

        let err = svc
            .update_account(
                user,
                account.id,
                AccountUpdate {
                    status: Some(AccountStatus::Active),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::InvalidTransition(_)));
    }
}
