//! In-process cache backend
//!
//! Uses the `cached` crate's `TimedSizedCache`: one store per entity kind,
//! each with the lifespan configured for that kind and a size bound, so keys
//! that are written and never read again age out of the LRU instead of
//! accumulating.

use async_trait::async_trait;
use cached::{Cached, TimedSizedCache};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{CacheBackend, CacheError, TRANSACTIONS_PREFIX};
use crate::config::CacheConfig;

type Store = Mutex<TimedSizedCache<String, String>>;

/// Single-node cache. Lifespans come from [`CacheConfig`]; the per-call TTL is ignored.
pub struct MemoryCache {
    accounts: Store,
    transactions: Store,
}

fn timed_store(capacity: usize, lifespan_secs: u64) -> Store {
    Mutex::new(TimedSizedCache::with_size_and_lifespan(
        capacity.max(1),
        lifespan_secs.max(1),
    ))
}

impl MemoryCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            accounts: timed_store(config.memory_capacity, config.account_ttl_secs),
            transactions: timed_store(config.memory_capacity, config.transactions_ttl_secs),
        }
    }

    fn store_for(&self, key: &str) -> Result<MutexGuard<'_, TimedSizedCache<String, String>>, CacheError> {
        let store = if key.starts_with(TRANSACTIONS_PREFIX) {
            &self.transactions
        } else {
            &self.accounts
        };
        store
            .lock()
            .map_err(|_| CacheError::Backend("memory cache lock poisoned".to_string()))
    }

    /// Entries currently held, expired ones included until they are evicted
    pub fn len(&self) -> usize {
        [&self.accounts, &self.transactions]
            .iter()
            .map(|store| store.lock().map(|s| s.cache_size()).unwrap_or(0))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.store_for(key)?.cache_get(key).cloned())
    }

    async fn set(&self, key: &str, value: String, _ttl: Duration) -> Result<(), CacheError> {
        self.store_for(key)?.cache_set(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), CacheError> {
        for key in keys {
            self.store_for(key)?.cache_remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(capacity: usize) -> CacheConfig {
        CacheConfig {
            account_ttl_secs: 1,
            transactions_ttl_secs: 60,
            memory_capacity: capacity,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_lifespan_per_kind() {
        let cache = MemoryCache::new(&config(16));
        let ttl = Duration::from_secs(60);
        cache.set("account:a", "v".into(), ttl).await.unwrap();
        cache.set("transactions:a", "[]".into(), ttl).await.unwrap();
        assert_eq!(cache.get("account:a").await.unwrap().as_deref(), Some("v"));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(cache.get("account:a").await.unwrap().is_none());
        assert_eq!(cache.get("transactions:a").await.unwrap().as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn test_unread_keys_are_bounded() {
        let cache = MemoryCache::new(&config(2));
        let ttl = Duration::from_secs(60);
        for id in ["a", "b", "c", "d"] {
            cache.set(&format!("account:{}", id), id.into(), ttl).await.unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get("account:a").await.unwrap().is_none());
        assert_eq!(cache.get("account:d").await.unwrap().as_deref(), Some("d"));
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let cache = MemoryCache::default();
        cache
            .set("account:a", "1".into(), Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .delete(&["account:a".to_string(), "transactions:nope".to_string()])
            .await
            .unwrap();
        assert!(cache.is_empty());
    }
}
