//! Idempotency record model and key derivation

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::ledger::UserId;

/// Stored outcome of a mutating request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
    pub status: u16,
    pub body: String,
}

impl StoredResponse {
    /// Recorded when the outcome itself could not be captured
    pub fn internal_error() -> Self {
        Self {
            status: 500,
            body: String::new(),
        }
    }
}

/// One row of the idempotency ledger
///
/// A record without a response is a placeholder: the protected operation is
/// still running (or died without recording an outcome).
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyRecord {
    pub id: Uuid,
    pub idempotency_key: String,
    pub user_id: UserId,
    pub request_path: String,
    /// SHA-256 hex of the request body
    pub request_hash: String,
    pub response_status: Option<u16>,
    pub response_body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn placeholder(
        key: &str,
        user_id: UserId,
        path: &str,
        request_hash: String,
        ttl: chrono::Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            idempotency_key: key.to_string(),
            user_id,
            request_path: path.to_string(),
            request_hash,
            response_status: None,
            response_body: None,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    #[inline]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn response(&self) -> Option<StoredResponse> {
        match (self.response_status, &self.response_body) {
            (Some(status), Some(body)) => Some(StoredResponse {
                status,
                body: body.clone(),
            }),
            _ => None,
        }
    }
}

/// SHA-256 hex digest of a request body
pub fn fingerprint(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// Deterministic key for a request that arrived without one
///
/// Fields are length-prefixed so `("ab", "c")` and `("a", "bc")` never hash alike.
pub fn derive_key(user_id: UserId, path: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update((path.len() as u64).to_be_bytes());
    hasher.update(path.as_bytes());
    hasher.update((body.len() as u64).to_be_bytes());
    hasher.update(body);
    format!("derived:{}", hex::encode(hasher.finalize()))
}
