//! Read-Through Cache
//!
//! Best-effort accelerator in front of the ledger. Entries are only ever
//! *removed* after a committed write, never updated in place, so the worst a
//! racing reader can see is a bounded-stale copy that the next invalidation
//! clears.
//!
//! Every backend failure (timeout, connection loss, bad payload) is logged
//! and treated as a miss. Nothing in this module returns an error to callers
//! of [`LedgerCache`].

pub mod memory;
pub mod redis_cache;
pub mod repository;

pub use memory::MemoryCache;
pub use redis_cache::RedisCache;
pub use repository::{CachedAccountRepository, CachedTransactionRepository};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::CacheConfig;
use crate::ledger::{Account, AccountId, TransactionRecord};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cache payload error: {0}")]
    Payload(String),
}

impl From<::redis::RedisError> for CacheError {
    fn from(e: ::redis::RedisError) -> Self {
        CacheError::Backend(e.to_string())
    }
}

/// Raw string key/value store with per-entry TTL
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Remove keys; missing keys are not an error
    async fn delete(&self, keys: &[String]) -> Result<(), CacheError>;
}

const ACCOUNT_PREFIX: &str = "account:";
const TRANSACTIONS_PREFIX: &str = "transactions:";

fn account_key(id: AccountId) -> String {
    format!("{}{}", ACCOUNT_PREFIX, id)
}

fn transactions_key(id: AccountId) -> String {
    format!("{}{}", TRANSACTIONS_PREFIX, id)
}

/// Typed view over a [`CacheBackend`]
#[derive(Clone)]
pub struct LedgerCache {
    backend: Arc<dyn CacheBackend>,
    account_ttl: Duration,
    transactions_ttl: Duration,
    op_timeout: Duration,
}

impl LedgerCache {
    pub fn new(backend: Arc<dyn CacheBackend>, config: &CacheConfig) -> Self {
        Self {
            backend,
            account_ttl: Duration::from_secs(config.account_ttl_secs),
            transactions_ttl: Duration::from_secs(config.transactions_ttl_secs),
            op_timeout: Duration::from_millis(config.op_timeout_ms),
        }
    }

    /// In-process cache with default TTLs
    pub fn in_memory() -> Self {
        let config = CacheConfig::default();
        Self::new(Arc::new(MemoryCache::new(&config)), &config)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn get_account(&self, id: AccountId) -> Option<Account> {
        self.get_json(&account_key(id)).await
    }

    pub async fn put_account(&self, account: &Account) {
        self.set_json(&account_key(account.id), account, self.account_ttl)
            .await;
    }

    /// The first page (default size) of an account's history
    pub async fn get_recent_transactions(&self, id: AccountId) -> Option<Vec<TransactionRecord>> {
        self.get_json(&transactions_key(id)).await
    }

    pub async fn put_recent_transactions(&self, id: AccountId, records: &[TransactionRecord]) {
        self.set_json(&transactions_key(id), &records, self.transactions_ttl)
            .await;
    }

    /// Drop the cached account and its recent-transactions page.
    /// Call only after the write that changed them has committed.
    pub async fn invalidate_account(&self, id: AccountId) {
        self.invalidate_accounts(&[id]).await;
    }

    pub async fn invalidate_accounts(&self, ids: &[AccountId]) {
        let keys: Vec<String> = ids
            .iter()
            .flat_map(|id| [account_key(*id), transactions_key(*id)])
            .collect();

        match tokio::time::timeout(self.op_timeout, self.backend.delete(&keys)).await {
            Ok(Ok(())) => {
                tracing::debug!(keys = keys.len(), "[cache] invalidated");
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, ?keys, "[cache] invalidation failed");
            }
            Err(_) => {
                tracing::warn!(
                    error = %CacheError::Timeout(self.op_timeout),
                    ?keys,
                    "[cache] invalidation failed"
                );
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match tokio::time::timeout(self.op_timeout, self.backend.get(key)).await {
            Ok(Ok(raw)) => raw?,
            Ok(Err(e)) => {
                tracing::warn!(key, error = %e, "[cache] get failed, falling back to store");
                return None;
            }
            Err(_) => {
                tracing::warn!(key, "[cache] get timed out, falling back to store");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %CacheError::Payload(e.to_string()), "[cache] discarding entry");
                None
            }
        }
    }

    async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key, error = %e, "[cache] serialize failed");
                return;
            }
        };

        match tokio::time::timeout(self.op_timeout, self.backend.set(key, raw, ttl)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(key, error = %e, "[cache] set failed"),
            Err(_) => tracing::warn!(key, "[cache] set timed out"),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ledger::AccountType;
    use uuid::Uuid;

    /// Backend that fails every call
    pub(crate) struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }

        async fn delete(&self, _keys: &[String]) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
    }

    /// Backend that never answers
    struct StalledBackend;

    #[async_trait]
    impl CacheBackend for StalledBackend {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            std::future::pending().await
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
            std::future::pending().await
        }

        async fn delete(&self, _keys: &[String]) -> Result<(), CacheError> {
            std::future::pending().await
        }
    }

    fn account() -> Account {
        Account::open(Uuid::new_v4(), "1234567890".into(), AccountType::Checking, "USD")
    }

    #[tokio::test]
    async fn test_put_get_invalidate() {
        let cache = LedgerCache::in_memory();
        let account = account();

        assert!(cache.get_account(account.id).await.is_none());
        cache.put_account(&account).await;
        assert_eq!(cache.get_account(account.id).await, Some(account.clone()));

        cache.put_recent_transactions(account.id, &[]).await;
        assert_eq!(cache.get_recent_transactions(account.id).await, Some(vec![]));

        cache.invalidate_account(account.id).await;
        assert!(cache.get_account(account.id).await.is_none());
        assert!(cache.get_recent_transactions(account.id).await.is_none());
    }

    #[tokio::test]
    async fn test_broken_backend_degrades_to_miss() {
        let cache = LedgerCache::new(Arc::new(BrokenBackend), &CacheConfig::default());
        let account = account();

        cache.put_account(&account).await;
        assert!(cache.get_account(account.id).await.is_none());
        cache.invalidate_account(account.id).await;
    }

    #[tokio::test]
    async fn test_stalled_backend_bounded_by_timeout() {
        let config = CacheConfig {
            op_timeout_ms: 10,
            ..CacheConfig::default()
        };
        let cache = LedgerCache::new(Arc::new(StalledBackend), &config);
        let account = account();

        let started = std::time::Instant::now();
        assert!(cache.get_account(account.id).await.is_none());
        cache.invalidate_account(account.id).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_garbage_payload_is_a_miss() {
        let backend = Arc::new(MemoryCache::default());
        let cache = LedgerCache::new(backend.clone(), &CacheConfig::default());
        let id = Uuid::new_v4();
        backend
            .set(&account_key(id), "{not json".into(), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(cache.get_account(id).await.is_none());
    }
}
