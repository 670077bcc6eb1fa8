//! Idempotency ledger and request deduplication
//!
//! Client retries of a mutating request collapse onto one execution. The
//! [`DedupGate`] owns the protocol; [`middleware::idempotency_middleware`]
//! applies it to HTTP routes; [`IdempotencySweeper`] trims expired rows.
//!
//! Records are keyed by `(idempotency_key, user_id)` and live for 24 hours
//! by default.

pub mod gate;
pub mod middleware;
pub mod postgres;
pub mod store;
pub mod sweeper;
pub mod types;

pub use gate::{DedupGate, GateDecision, GateOutcome, Reservation};
pub use middleware::{IDEMPOTENCY_KEY_HEADER, REPLAYED_HEADER, idempotency_middleware};
pub use postgres::PgIdempotencyStore;
pub use store::{IdempotencyStore, MemoryIdempotencyStore};
pub use sweeper::IdempotencySweeper;
pub use types::{IdempotencyRecord, StoredResponse, derive_key, fingerprint};
