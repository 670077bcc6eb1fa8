//! Redis cache backend
//!
//! Shared across gateway instances. The connection manager reconnects on its
//! own; while Redis is down every call fails fast and the caller falls back
//! to the ledger.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;

use super::{CacheBackend, CacheError};

#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("Redis cache connected");
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, seconds).await?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), CacheError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(keys).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_redis_set_get_delete() {
        let cache = RedisCache::connect(&test_redis_url()).await.unwrap();
        let key = format!("test:{}", uuid::Uuid::new_v4());

        cache
            .set(&key, "value".into(), Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(cache.get(&key).await.unwrap().as_deref(), Some("value"));

        cache.delete(std::slice::from_ref(&key)).await.unwrap();
        assert!(cache.get(&key).await.unwrap().is_none());
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(redis::Client::open("not a url").is_err());
    }
}
