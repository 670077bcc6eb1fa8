//! HTTP Gateway
//!
//! ```text
//! client ──▶ [X-User-Id from proxy] ──▶ rate limit ──▶ dedup middleware ──▶ handler ──▶ service
//! ```
//!
//! Every API route is rate limited per client. Mutating methods then pass
//! through the idempotency middleware; reads go straight to the handlers.

pub mod handlers;
pub mod rate_limit;
pub mod state;
pub mod types;
pub mod user;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::accounts::api as accounts_api;
use crate::idempotency::idempotency_middleware;
use crate::transfer::api as transfer_api;
use rate_limit::rate_limit_middleware;
use state::AppState;

/// Full application router
///
/// Routes are registered flat (no `nest`) so the middleware sees the full
/// request path, which is part of the idempotency fingerprint.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        // ==========================================================================
        // Accounts
        // ==========================================================================
        .route(
            "/api/v1/accounts",
            post(accounts_api::create_account).get(accounts_api::list_accounts),
        )
        .route(
            "/api/v1/accounts/{id}",
            get(accounts_api::get_account)
                .patch(accounts_api::update_account)
                .delete(accounts_api::delete_account),
        )
        // ==========================================================================
        // Transactions
        // ==========================================================================
        .route(
            "/api/v1/transactions/transfer",
            post(transfer_api::create_transfer),
        )
        .route("/api/v1/transactions", get(transfer_api::list_transactions))
        .route(
            "/api/v1/transactions/{id}",
            get(transfer_api::get_transaction),
        )
        .layer(from_fn_with_state(
            state.gate.clone(),
            idempotency_middleware,
        ))
        .layer(from_fn_with_state(
            state.limiter.clone(),
            rate_limit_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health_check))
        .merge(api)
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves
pub async fn serve<F>(state: Arc<AppState>, addr: &str, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {}: {}", addr, e))?;

    info!(addr = %addr, "Gateway listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    info!("Gateway stopped");
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::accounts::{AccountService, TrustedProxyDirectory};
    use crate::cache::{CachedAccountRepository, CachedTransactionRepository, LedgerCache};
    use crate::config::{IdempotencyConfig, RateLimitConfig, TransferConfig};
    use crate::idempotency::{
        DedupGate, IDEMPOTENCY_KEY_HEADER, MemoryIdempotencyStore, REPLAYED_HEADER,
    };
    use crate::ledger::{AccountRepository, LedgerStore, MemoryLedgerStore, TransactionRepository};
    use crate::transfer::notifier::tests::RecordingNotifier;
    use crate::transfer::{TransactionQueries, TransferOrchestrator};
    use rate_limit::RateLimiter;
    use user::USER_ID_HEADER;

    /// In-memory application with handles the tests can poke at
    pub(crate) struct TestApp {
        pub router: Router,
        pub ledger: MemoryLedgerStore,
        pub idempotency: Arc<MemoryIdempotencyStore>,
        pub notifier: Arc<RecordingNotifier>,
        pub state: Arc<AppState>,
    }

    impl TestApp {
        /// Rate limiting off: oneshot requests carry no peer address and would share one window
        pub fn new() -> Self {
            Self::with_rate_limit(RateLimitConfig {
                enabled: false,
                ..Default::default()
            })
        }

        pub fn with_rate_limit(rate_limit: RateLimitConfig) -> Self {
            let ledger = MemoryLedgerStore::new();
            let cache = LedgerCache::in_memory();
            let notifier = Arc::new(RecordingNotifier::default());
            let idempotency = Arc::new(MemoryIdempotencyStore::new());

            let store: Arc<dyn LedgerStore> = Arc::new(ledger.clone());
            let direct_accounts: Arc<dyn AccountRepository> = Arc::new(ledger.clone());
            let direct_transactions: Arc<dyn TransactionRepository> = Arc::new(ledger.clone());
            let cached_accounts: Arc<dyn AccountRepository> = Arc::new(
                CachedAccountRepository::new(direct_accounts.clone(), cache.clone()),
            );
            let cached_transactions: Arc<dyn TransactionRepository> = Arc::new(
                CachedTransactionRepository::new(direct_transactions, cache.clone()),
            );

            let orchestrator = Arc::new(TransferOrchestrator::new(
                store,
                cache.clone(),
                notifier.clone(),
                TransferConfig::default(),
            ));
            let accounts = Arc::new(AccountService::new(
                direct_accounts,
                cached_accounts.clone(),
                Arc::new(TrustedProxyDirectory),
            ));
            let queries = Arc::new(TransactionQueries::new(cached_accounts, cached_transactions));
            let gate = Arc::new(DedupGate::new(
                idempotency.clone(),
                &IdempotencyConfig::default(),
            ));

            let limiter = Arc::new(RateLimiter::new(&rate_limit));

            let state = Arc::new(AppState::new(
                orchestrator,
                accounts,
                queries,
                gate,
                limiter,
                cache,
            ));
            Self {
                router: router(state.clone()),
                ledger,
                idempotency,
                notifier,
                state,
            }
        }

        pub async fn call(
            &self,
            method: &str,
            uri: &str,
            user: Option<Uuid>,
            key: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value, bool) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(user) = user {
                builder = builder.header(USER_ID_HEADER, user.to_string());
            }
            if let Some(key) = key {
                builder = builder.header(IDEMPOTENCY_KEY_HEADER, key);
            }
            let request = match body {
                Some(body) => builder
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };

            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let replayed = response.headers().contains_key(REPLAYED_HEADER);
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let json = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, json, replayed)
        }

        /// Open an account over HTTP and return its id
        pub async fn open(&self, user: Uuid, currency: &str) -> Uuid {
            let (status, body, _) = self
                .call(
                    "POST",
                    "/api/v1/accounts",
                    Some(user),
                    Some(&format!("open-{}", Uuid::new_v4())),
                    Some(json!({"account_type": "checking", "currency": currency})),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED, "{body}");
            body["data"]["id"].as_str().unwrap().parse().unwrap()
        }
    }

    #[tokio::test]
    async fn test_health() {
        let app = TestApp::new();
        let (status, body, _) = app.call("GET", "/health", None, None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], 0);
        assert_eq!(body["data"]["ledger"], "memory");
    }

    #[tokio::test]
    async fn test_missing_user_is_401() {
        let app = TestApp::new();
        let (status, body, _) = app.call("GET", "/api/v1/accounts", None, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "MISSING_AUTH");
    }

    #[tokio::test]
    async fn test_account_crud() {
        let app = TestApp::new();
        let user = Uuid::new_v4();
        let id = app.open(user, "usd").await;

        let (status, body, _) = app
            .call("GET", &format!("/api/v1/accounts/{id}"), Some(user), None, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["currency"], "USD");
        assert_eq!(body["data"]["balance"], "0");

        let (status, body, _) = app
            .call(
                "PATCH",
                &format!("/api/v1/accounts/{id}"),
                Some(user),
                None,
                Some(json!({"account_type": "savings"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["account_type"], "savings");

        let (status, body, _) = app.call("GET", "/api/v1/accounts", Some(user), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let (status, _, _) = app
            .call("DELETE", &format!("/api/v1/accounts/{id}"), Some(user), None, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _, _) = app
            .call("GET", &format!("/api/v1/accounts/{id}"), Some(user), None, None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bad_input_is_400() {
        let app = TestApp::new();
        let user = Uuid::new_v4();

        let (status, _, _) = app
            .call("GET", "/api/v1/accounts/not-a-uuid", Some(user), None, None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body, _) = app
            .call(
                "POST",
                "/api/v1/accounts",
                Some(user),
                None,
                Some(json!({"account_type": "checking", "currency": "DOLLAR"})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], types::error_codes::INVALID_PARAMETER);

        let (status, _, _) = app
            .call(
                "POST",
                "/api/v1/accounts",
                Some(user),
                None,
                Some(json!({"account_type": "brokerage", "currency": "USD"})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_reads_bypass_idempotency_ledger() {
        let app = TestApp::new();
        let user = Uuid::new_v4();
        app.open(user, "USD").await;
        let before = app.idempotency.len();

        for _ in 0..3 {
            let (status, _, replayed) = app
                .call("GET", "/api/v1/accounts", Some(user), Some("read-key"), None)
                .await;
            assert_eq!(status, StatusCode::OK);
            assert!(!replayed);
        }
        assert_eq!(app.idempotency.len(), before);
    }

    #[tokio::test]
    async fn test_rate_limits() {
        let app = TestApp::with_rate_limit(RateLimitConfig {
            max_requests: 4,
            strict_max_requests: 1,
            ..Default::default()
        });
        let user = Uuid::new_v4();
        let transfer = json!({"from_account_id": Uuid::new_v4(), "to_account_id": Uuid::new_v4(), "amount": "1"});

        let (status, _, _) = app
            .call("POST", "/api/v1/transactions/transfer", Some(user), Some("t-1"), Some(transfer.clone()))
            .await;
        assert_ne!(status, StatusCode::TOO_MANY_REQUESTS);
        let (status, body, _) = app
            .call("POST", "/api/v1/transactions/transfer", Some(user), Some("t-2"), Some(transfer))
            .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["code"], types::error_codes::RATE_LIMITED);
        assert_eq!(body["error"], "RATE_LIMITED");

        // Two requests left in the general window
        for _ in 0..2 {
            let (status, _, _) = app.call("GET", "/api/v1/accounts", Some(user), None, None).await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, _, _) = app.call("GET", "/api/v1/accounts", Some(user), None, None).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

        let (status, _, _) = app.call("GET", "/health", None, None, None).await;
        assert_eq!(status, StatusCode::OK);
    }
}
