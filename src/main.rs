//! bank_ledger server
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌─────────────┐    ┌──────────────┐
//! │  Config  │───▶│ Logging  │───▶│ Ledger (PG) │───▶│ Cache (Redis)│
//! │  (YAML)  │    │(tracing) │    │  or memory  │    │  or memory   │
//! └──────────┘    └──────────┘    └─────────────┘    └──────────────┘
//!                                        │
//!                        services ◀──────┘──▶ sweeper
//!                            │
//!                        HTTP gateway (until Ctrl-C)
//! ```
//!
//! Usage: `bank_ledger [--env dev] [--port 8080]`

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use bank_ledger::accounts::{AccountService, TrustedProxyDirectory};
use bank_ledger::cache::{
    CacheBackend, CachedAccountRepository, CachedTransactionRepository, LedgerCache, MemoryCache,
    RedisCache,
};
use bank_ledger::config::AppConfig;
use bank_ledger::db::Database;
use bank_ledger::gateway::{self, rate_limit::RateLimiter, state::AppState};
use bank_ledger::idempotency::{
    DedupGate, IdempotencyStore, IdempotencySweeper, MemoryIdempotencyStore, PgIdempotencyStore,
};
use bank_ledger::ledger::{
    AccountRepository, LedgerStore, MemoryLedgerStore, PgLedgerStore, TransactionRepository,
};
use bank_ledger::logging;
use bank_ledger::transfer::{LogNotifier, TransactionQueries, TransferOrchestrator};

// ============================================================
// CLI
// ============================================================

fn arg_value(flags: &[&str]) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    args.iter()
        .position(|a| flags.contains(&a.as_str()))
        .and_then(|i| args.get(i + 1).cloned())
}

fn get_env() -> String {
    arg_value(&["--env", "-e"]).unwrap_or_else(|| "dev".to_string())
}

fn get_port() -> anyhow::Result<Option<u16>> {
    arg_value(&["--port"])
        .map(|p| p.parse().with_context(|| format!("invalid --port {}", p)))
        .transpose()
}

/// One store viewed through each of its capabilities
struct LedgerHandles {
    store: Arc<dyn LedgerStore>,
    accounts: Arc<dyn AccountRepository>,
    transactions: Arc<dyn TransactionRepository>,
}

impl LedgerHandles {
    fn new<S: LedgerStore + 'static>(store: S) -> Self {
        let store = Arc::new(store);
        Self {
            store: store.clone(),
            accounts: store.clone(),
            transactions: store,
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

// ============================================================
// MAIN
// ============================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let mut config = AppConfig::load(&env)?;
    if let Some(port) = get_port()? {
        config.gateway.port = port;
    }
    let _log_guard = logging::init_logging(&config);
    info!(env = %env, "Starting bank_ledger");

    // Ledger + idempotency storage
    let (ledger, idempotency, db) = match &config.postgres_url {
        Some(url) => {
            let db = Arc::new(Database::connect(url).await.context("PostgreSQL connect")?);
            db.init_schema().await.context("PostgreSQL schema")?;
            info!("Ledger: PostgreSQL");
            let idempotency: Arc<dyn IdempotencyStore> =
                Arc::new(PgIdempotencyStore::new(db.pool().clone()));
            (
                LedgerHandles::new(PgLedgerStore::new(db.pool().clone())),
                idempotency,
                Some(db),
            )
        }
        None => {
            warn!("No postgres_url configured, using the in-memory ledger (data is not durable)");
            let idempotency: Arc<dyn IdempotencyStore> = Arc::new(MemoryIdempotencyStore::new());
            (LedgerHandles::new(MemoryLedgerStore::new()), idempotency, None)
        }
    };

    // Cache
    let backend: Arc<dyn CacheBackend> = match &config.redis_url {
        Some(url) => match RedisCache::connect(url).await {
            Ok(redis) => {
                info!("Cache: Redis");
                Arc::new(redis)
            }
            Err(e) => {
                warn!(error = %e, "Redis unavailable, using the in-process cache");
                Arc::new(MemoryCache::new(&config.cache))
            }
        },
        None => Arc::new(MemoryCache::new(&config.cache)),
    };
    let cache = LedgerCache::new(backend, &config.cache);

    // Services
    let LedgerHandles {
        store,
        accounts: accounts_direct,
        transactions: transactions_direct,
    } = ledger;
    let accounts_cached: Arc<dyn AccountRepository> = Arc::new(CachedAccountRepository::new(
        accounts_direct.clone(),
        cache.clone(),
    ));
    let transactions_cached: Arc<dyn TransactionRepository> = Arc::new(
        CachedTransactionRepository::new(transactions_direct, cache.clone()),
    );

    let orchestrator = Arc::new(TransferOrchestrator::new(
        store,
        cache.clone(),
        Arc::new(LogNotifier),
        config.transfer.clone(),
    ));
    let accounts = Arc::new(AccountService::new(
        accounts_direct,
        accounts_cached.clone(),
        Arc::new(TrustedProxyDirectory),
    ));
    let queries = Arc::new(TransactionQueries::new(accounts_cached, transactions_cached));
    let gate = Arc::new(DedupGate::new(idempotency.clone(), &config.idempotency));

    let limiter = Arc::new(RateLimiter::new(&config.rate_limit));

    let mut state = AppState::new(orchestrator, accounts, queries, gate, limiter, cache);
    if let Some(db) = &db {
        state = state.with_database(db.clone());
    }

    let sweeper = IdempotencySweeper::new(
        idempotency,
        Duration::from_secs(config.idempotency.sweep_interval_secs),
    );
    let sweeper_handle = tokio::spawn(sweeper.run());

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let served = gateway::serve(Arc::new(state), &addr, shutdown_signal()).await;

    sweeper_handle.abort();
    if let Some(db) = db {
        db.close().await;
    }
    info!("bank_ledger stopped");
    served
}
