//! bank_ledger - Atomic Funds Transfer Engine
//!
//! Moves money between accounts without ever creating or destroying it,
//! collapses client retries onto a single execution, and serves hot reads
//! from a cache that is never trusted for writes.
//!
//! # Modules
//!
//! - [`ledger`] - Account and transaction store of record (PostgreSQL or in-memory)
//! - [`transfer`] - Transfer orchestrator: locked, retried, deadlined ledger transactions
//! - [`idempotency`] - Idempotency ledger and the request dedup gate
//! - [`cache`] - Read-through account / history cache (Redis or in-process)
//! - [`accounts`] - Account lifecycle
//! - [`gateway`] - HTTP surface
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing subscriber setup
//! - [`db`] - PostgreSQL pool and schema

pub mod accounts;
pub mod cache;
pub mod config;
pub mod db;
pub mod gateway;
pub mod idempotency;
pub mod ledger;
pub mod logging;
pub mod transfer;

// Convenient re-exports at crate root
pub use accounts::{AccountError, AccountService};
pub use cache::LedgerCache;
pub use config::AppConfig;
pub use idempotency::DedupGate;
pub use ledger::{Account, LedgerStore, TransactionRecord};
pub use transfer::{TransferError, TransferOrchestrator, TransferRequest};
