use std::sync::Arc;

use crate::accounts::AccountService;
use crate::cache::LedgerCache;
use crate::db::Database;
use crate::idempotency::DedupGate;
use super::rate_limit::RateLimiter;
use crate::transfer::{TransactionQueries, TransferOrchestrator};

/// Gateway shared state
///
/// Every handle is built once in `main` and passed in explicitly.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<TransferOrchestrator>,
    pub accounts: Arc<AccountService>,
    pub queries: Arc<TransactionQueries>,
    pub gate: Arc<DedupGate>,
    pub limiter: Arc<RateLimiter>,
    pub cache: LedgerCache,
    /// PostgreSQL handle (None when running on the in-memory ledger)
    pub pg_db: Option<Arc<Database>>,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<TransferOrchestrator>,
        accounts: Arc<AccountService>,
        queries: Arc<TransactionQueries>,
        gate: Arc<DedupGate>,
        limiter: Arc<RateLimiter>,
        cache: LedgerCache,
    ) -> Self {
        Self {
            orchestrator,
            accounts,
            queries,
            gate,
            limiter,
            cache,
            pg_db: None,
        }
    }

    pub fn with_database(mut self, db: Arc<Database>) -> Self {
        self.pg_db = Some(db);
        self
    }
}
