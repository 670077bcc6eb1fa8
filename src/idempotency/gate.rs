//! Request Deduplication Gate
//!
//! Protocol for one `(key, user)`:
//!
//! 1. Live record found: replay its stored response, or report it in flight.
//!    An expired record is deleted and treated as absent.
//! 2. Otherwise insert a placeholder. The insert is the linearization point:
//!    of two concurrent identical requests exactly one wins it and runs the
//!    protected operation; the loser is told the key is in flight.
//! 3. The winner records whatever the operation answered, failures included.
//!    Only a transient (503) answer releases the placeholder instead, since
//!    nothing was committed and a retry must be allowed to execute.

use axum::http::Method;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::store::IdempotencyStore;
use super::types::{IdempotencyRecord, StoredResponse, derive_key, fingerprint};
use crate::config::IdempotencyConfig;
use crate::ledger::{StoreError, UserId};

/// Longest client-supplied key the ledger accepts
pub const MAX_KEY_LEN: usize = 255;

const TRANSIENT_STATUS: u16 = 503;

/// Placeholder owned by the request that inserted it
#[derive(Debug, Clone)]
pub struct Reservation {
    record: IdempotencyRecord,
}

impl Reservation {
    pub fn key(&self) -> &str {
        &self.record.idempotency_key
    }
}

#[derive(Debug)]
pub enum GateDecision {
    /// Placeholder inserted; run the operation and hand the outcome to [`DedupGate::finish`]
    Proceed(Reservation),
    /// Same request already answered
    Replay(StoredResponse),
    /// Same key still being processed elsewhere
    InFlight,
    /// Key already used for a different request body or path
    KeyReused,
}

/// Result of [`DedupGate::run`]
#[derive(Debug, PartialEq, Eq)]
pub enum GateOutcome {
    Executed(StoredResponse),
    Replayed(StoredResponse),
    InFlight,
    KeyReused,
}

pub struct DedupGate {
    store: Arc<dyn IdempotencyStore>,
    ttl: chrono::Duration,
    derived_key_paths: Vec<String>,
}

impl DedupGate {
    pub fn new(store: Arc<dyn IdempotencyStore>, config: &IdempotencyConfig) -> Self {
        Self {
            store,
            ttl: config.ttl(),
            derived_key_paths: config.derived_key_paths.clone(),
        }
    }

    /// Only state-changing verbs are deduplicated
    pub fn is_gated_method(method: &Method) -> bool {
        *method == Method::POST || *method == Method::PUT || *method == Method::PATCH
    }

    /// The key for a request: the client's header if given, else a derived
    /// key on the configured safety-critical paths, else none (not gated).
    pub fn resolve_key(
        &self,
        header: Option<&str>,
        user_id: UserId,
        path: &str,
        body: &[u8],
    ) -> Option<String> {
        match header.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => Some(key.to_string()),
            None if self.derived_key_paths.iter().any(|p| p == path) => {
                Some(derive_key(user_id, path, body))
            }
            None => None,
        }
    }

    pub async fn begin(
        &self,
        key: &str,
        user_id: UserId,
        path: &str,
        body: &[u8],
    ) -> Result<GateDecision, StoreError> {
        let now = Utc::now();
        let request_hash = fingerprint(body);

        if let Some(existing) = self.store.find(key, user_id).await? {
            if !existing.is_expired(now) {
                return Ok(classify(&existing, path, &request_hash));
            }
            if self.store.delete_expired(key, user_id, now).await? {
                debug!(key, user_id = %user_id, "Expired idempotency record removed");
            }
        }

        let record = IdempotencyRecord::placeholder(key, user_id, path, request_hash, self.ttl);
        if self.store.try_insert(&record).await? {
            return Ok(GateDecision::Proceed(Reservation { record }));
        }

        // Lost the insert race; report whatever the winner has so far
        match self.store.find(key, user_id).await? {
            Some(existing) if !existing.is_expired(now) => {
                Ok(classify(&existing, path, &record.request_hash))
            }
            _ => Ok(GateDecision::InFlight),
        }
    }

    /// Record the outcome of a reserved request (or release it if transient)
    pub async fn finish(&self, reservation: Reservation, response: &StoredResponse) {
        let record = &reservation.record;

        if response.status == TRANSIENT_STATUS {
            match self.store.release(record).await {
                Ok(()) => debug!(key = %record.idempotency_key, "Placeholder released after transient failure"),
                Err(e) => error!(key = %record.idempotency_key, error = %e, "Failed to release placeholder"),
            }
            return;
        }

        match self.store.complete(record, response).await {
            Ok(true) => {
                debug!(key = %record.idempotency_key, status = response.status, "Idempotent outcome recorded");
            }
            Ok(false) => {
                warn!(key = %record.idempotency_key, "Placeholder vanished before its outcome was recorded");
            }
            Err(e) => {
                error!(key = %record.idempotency_key, error = %e, "Failed to record idempotent outcome");
            }
        }
    }

    /// Run `op` at most once for `(key, user)`
    pub async fn run<F, Fut>(
        &self,
        key: &str,
        user_id: UserId,
        path: &str,
        body: &[u8],
        op: F,
    ) -> Result<GateOutcome, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StoredResponse>,
    {
        match self.begin(key, user_id, path, body).await? {
            GateDecision::Proceed(reservation) => {
                let response = op().await;
                self.finish(reservation, &response).await;
                Ok(GateOutcome::Executed(response))
            }
            GateDecision::Replay(response) => Ok(GateOutcome::Replayed(response)),
            GateDecision::InFlight => Ok(GateOutcome::InFlight),
            GateDecision::KeyReused => Ok(GateOutcome::KeyReused),
        }
    }
}

fn classify(existing: &IdempotencyRecord, path: &str, request_hash: &str) -> GateDecision {
    if existing.request_hash != request_hash || existing.request_path != path {
        return GateDecision::KeyReused;
    }
    match existing.response() {
        Some(response) => GateDecision::Replay(response),
        None => GateDecision::InFlight,
    }
}
