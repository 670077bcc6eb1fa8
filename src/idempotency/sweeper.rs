//! Expired-record sweeper
//!
//! Lazy deletion on lookup keeps the gate correct on its own; this worker
//! only bounds table growth from keys that are never retried.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use super::store::IdempotencyStore;
use crate::ledger::StoreError;

pub struct IdempotencySweeper {
    store: Arc<dyn IdempotencyStore>,
    interval: Duration,
}

impl IdempotencySweeper {
    pub fn new(store: Arc<dyn IdempotencyStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Sweep forever. Intended to be spawned and aborted on shutdown.
    pub async fn run(self) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting idempotency sweeper"
        );

        // tokio panics on a zero period
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep_once().await {
                error!(error = %e, "Idempotency sweep failed");
            }
        }
    }

    /// Run a single purge pass
    pub async fn sweep_once(&self) -> Result<u64, StoreError> {
        let purged = self.store.purge_expired(Utc::now()).await?;
        if purged > 0 {
            info!(purged, "Purged expired idempotency records");
        } else {
            debug!("No expired idempotency records");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::store::MemoryIdempotencyStore;
    use crate::idempotency::types::{IdempotencyRecord, fingerprint};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let store = Arc::new(MemoryIdempotencyStore::new());
        let user = Uuid::new_v4();
        for key in ["a", "b", "c"] {
            let record = IdempotencyRecord::placeholder(
                key,
                user,
                "/p",
                fingerprint(b""),
                chrono::Duration::hours(24),
            );
            store.try_insert(&record).await.unwrap();
        }
        store.set_expires_at("a", user, Utc::now() - chrono::Duration::minutes(1));

        let sweeper = IdempotencySweeper::new(store.clone(), Duration::from_secs(600));
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
        assert_eq!(store.len(), 2);
    }
}
