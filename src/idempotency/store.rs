//! Idempotency ledger storage

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::types::{IdempotencyRecord, StoredResponse};
use crate::ledger::{StoreError, UserId};

/// Persistence for idempotency records, unique on `(idempotency_key, user_id)`
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn find(&self, key: &str, user_id: UserId)
    -> Result<Option<IdempotencyRecord>, StoreError>;

    /// Remove the record for `(key, user)` only if it has expired by `now`
    async fn delete_expired(
        &self,
        key: &str,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Insert a placeholder. `false` when the key is already taken; never blocks.
    async fn try_insert(&self, record: &IdempotencyRecord) -> Result<bool, StoreError>;

    /// Attach the outcome to the placeholder created as `record`.
    /// `false` when that placeholder is gone or already has an outcome.
    async fn complete(
        &self,
        record: &IdempotencyRecord,
        response: &StoredResponse,
    ) -> Result<bool, StoreError>;

    /// Drop the placeholder created as `record` if it still has no outcome
    async fn release(&self, record: &IdempotencyRecord) -> Result<(), StoreError>;

    /// Delete every record expired by `now`; returns how many were removed
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// In-process idempotency ledger
#[derive(Default)]
pub struct MemoryIdempotencyStore {
    records: DashMap<(String, UserId), IdempotencyRecord>,
}

impl MemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Move a record's expiry, e.g. to simulate an old record in tests
    pub fn set_expires_at(&self, key: &str, user_id: UserId, expires_at: DateTime<Utc>) -> bool {
        match self.records.get_mut(&(key.to_string(), user_id)) {
            Some(mut record) => {
                record.expires_at = expires_at;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn find(
        &self,
        key: &str,
        user_id: UserId,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        Ok(self
            .records
            .get(&(key.to_string(), user_id))
            .map(|r| r.value().clone()))
    }

    async fn delete_expired(
        &self,
        key: &str,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(self
            .records
            .remove_if(&(key.to_string(), user_id), |_, r| r.is_expired(now))
            .is_some())
    }

    async fn try_insert(&self, record: &IdempotencyRecord) -> Result<bool, StoreError> {
        match self
            .records
            .entry((record.idempotency_key.clone(), record.user_id))
        {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(true)
            }
        }
    }

    async fn complete(
        &self,
        record: &IdempotencyRecord,
        response: &StoredResponse,
    ) -> Result<bool, StoreError> {
        let key = (record.idempotency_key.clone(), record.user_id);
        match self.records.get_mut(&key) {
            Some(mut stored) if stored.id == record.id && stored.response_status.is_none() => {
                stored.response_status = Some(response.status);
                stored.response_body = Some(response.body.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, record: &IdempotencyRecord) -> Result<(), StoreError> {
        let key = (record.idempotency_key.clone(), record.user_id);
        self.records
            .remove_if(&key, |_, r| r.id == record.id && r.response_status.is_none());
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let before = self.records.len();
        self.records.retain(|_, r| !r.is_expired(now));
        Ok(before.saturating_sub(self.records.len()) as u64)
    }
}
