//! Axum middleware wrapping mutating routes with the [`DedupGate`]

use axum::{
    body::{Body, to_bytes},
    extract::State,
    http::{HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use super::gate::{DedupGate, GateDecision, MAX_KEY_LEN, Reservation};
use super::types::StoredResponse;
use crate::gateway::types::{error_codes, error_response};
use crate::gateway::user::user_id_from_headers;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const REPLAYED_HEADER: &str = "idempotent-replayed";

const MAX_REQUEST_BODY: usize = 64 * 1024;

pub async fn idempotency_middleware(
    State(gate): State<Arc<DedupGate>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !DedupGate::is_gated_method(request.method()) {
        return next.run(request).await;
    }
    // Anonymous requests are rejected by the handlers themselves
    let Some(user_id) = user_id_from_headers(request.headers()) else {
        return next.run(request).await;
    };

    let header_key = match request.headers().get(IDEMPOTENCY_KEY_HEADER) {
        None => None,
        Some(value) => match value.to_str() {
            Ok(key) if key.len() <= MAX_KEY_LEN => Some(key.to_string()),
            _ => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    error_codes::INVALID_PARAMETER,
                    "INVALID_IDEMPOTENCY_KEY",
                    format!("Idempotency-Key must be visible ASCII, at most {} bytes", MAX_KEY_LEN),
                );
            }
        },
    };

    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, MAX_REQUEST_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                error_codes::INVALID_PARAMETER,
                "PAYLOAD_TOO_LARGE",
                "Request body too large",
            );
        }
    };
    let path = parts.uri.path().to_string();

    let Some(key) = gate.resolve_key(header_key.as_deref(), user_id, &path, &bytes) else {
        return next.run(Request::from_parts(parts, Body::from(bytes))).await;
    };

    let reservation = match gate.begin(&key, user_id, &path, &bytes).await {
        Ok(GateDecision::Proceed(reservation)) => reservation,
        Ok(GateDecision::Replay(stored)) => {
            tracing::info!(key = %key, user_id = %user_id, "Replaying idempotent response");
            return replay(stored);
        }
        Ok(GateDecision::InFlight) => {
            return error_response(
                StatusCode::CONFLICT,
                error_codes::DUPLICATE_REQUEST,
                "IDEMPOTENCY_IN_FLIGHT",
                "A request with this idempotency key is already being processed",
            );
        }
        Ok(GateDecision::KeyReused) => {
            return error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                error_codes::DUPLICATE_REQUEST,
                "IDEMPOTENCY_KEY_REUSED",
                "Idempotency key was already used for a different request",
            );
        }
        Err(e) => {
            tracing::error!(key = %key, error = %e, "Idempotency ledger unavailable");
            return error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                error_codes::SERVICE_UNAVAILABLE,
                "TRY_AGAIN",
                "Idempotency ledger unavailable, retry with the same key",
            );
        }
    };

    // Detached from the connection: a disconnect must not strand the placeholder
    let request = Request::from_parts(parts, Body::from(bytes));
    let fallback = reservation.clone();
    match tokio::spawn(execute(gate.clone(), reservation, next, request)).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(key = %key, error = %e, "Idempotent request task failed");
            gate.finish(fallback, &StoredResponse::internal_error()).await;
            internal_error()
        }
    }
}

async fn execute(
    gate: Arc<DedupGate>,
    reservation: Reservation,
    next: Next,
    request: Request<Body>,
) -> Response {
    let response = next.run(request).await;

    let (parts, body) = response.into_parts();
    let body = match to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(key = %reservation.key(), error = %e, "Failed to buffer response body");
            gate.finish(reservation, &StoredResponse::internal_error()).await;
            return internal_error();
        }
    };

    let stored = StoredResponse {
        status: parts.status.as_u16(),
        body: String::from_utf8_lossy(&body).into_owned(),
    };
    gate.finish(reservation, &stored).await;

    Response::from_parts(parts, Body::from(body))
}

fn internal_error() -> Response {
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        error_codes::INTERNAL_ERROR,
        "INTERNAL_ERROR",
        "Response could not be recorded",
    )
}

fn replay(stored: StoredResponse) -> Response {
    let status = StatusCode::from_u16(stored.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = Response::new(Body::from(stored.body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
        .headers_mut()
        .insert(REPLAYED_HEADER, HeaderValue::from_static("true"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdempotencyConfig;
    use crate::gateway::user::USER_ID_HEADER;
    use crate::idempotency::store::MemoryIdempotencyStore;
    use axum::{Router, middleware, routing::post};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;
    use uuid::Uuid;

    fn app(counter: Arc<AtomicUsize>) -> Router {
        let gate = Arc::new(DedupGate::new(
            Arc::new(MemoryIdempotencyStore::new()),
            &IdempotencyConfig::default(),
        ));
        Router::new()
            .route(
                "/api/v1/transactions/transfer",
                post(move || {
                    let counter = counter.clone();
                    async move {
                        let n = counter.fetch_add(1, Ordering::SeqCst);
                        (StatusCode::CREATED, format!("{{\"n\":{}}}", n))
                    }
                }),
            )
            .layer(middleware::from_fn_with_state(gate, idempotency_middleware))
    }

    fn transfer(user: Uuid, key: Option<&str>, body: &'static str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/v1/transactions/transfer")
            .header(USER_ID_HEADER, user.to_string());
        if let Some(key) = key {
            builder = builder.header(IDEMPOTENCY_KEY_HEADER, key);
        }
        builder.body(Body::from(body)).unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_replay_is_byte_identical() {
        let counter = Arc::new(AtomicUsize::new(0));
        let app = app(counter.clone());
        let user = Uuid::new_v4();

        let first = app.clone().oneshot(transfer(user, Some("K"), "{}")).await.unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);
        assert!(first.headers().get(REPLAYED_HEADER).is_none());
        let first_body = body_string(first).await;

        let second = app.oneshot(transfer(user, Some("K"), "{}")).await.unwrap();
        assert_eq!(second.status(), StatusCode::CREATED);
        assert_eq!(second.headers().get(REPLAYED_HEADER).unwrap(), "true");
        assert_eq!(body_string(second).await, first_body);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transfer_without_key_gets_derived_key() {
        let counter = Arc::new(AtomicUsize::new(0));
        let app = app(counter.clone());
        let user = Uuid::new_v4();

        app.clone().oneshot(transfer(user, None, r#"{"a":1}"#)).await.unwrap();
        let again = app.clone().oneshot(transfer(user, None, r#"{"a":1}"#)).await.unwrap();
        assert_eq!(again.headers().get(REPLAYED_HEADER).unwrap(), "true");

        // A different payload is a different request
        app.oneshot(transfer(user, None, r#"{"a":2}"#)).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_key_reuse_with_other_body_rejected() {
        let counter = Arc::new(AtomicUsize::new(0));
        let app = app(counter.clone());
        let user = Uuid::new_v4();

        app.clone().oneshot(transfer(user, Some("K"), "{}")).await.unwrap();
        let reused = app.oneshot(transfer(user, Some("K"), r#"{"x":1}"#)).await.unwrap();
        assert_eq!(reused.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_anonymous_requests_bypass_gate() {
        let counter = Arc::new(AtomicUsize::new(0));
        let app = app(counter.clone());

        for _ in 0..2 {
            let request = Request::builder()
                .method("POST")
                .uri("/api/v1/transactions/transfer")
                .header(IDEMPOTENCY_KEY_HEADER, "K")
                .body(Body::from("{}"))
                .unwrap();
            app.clone().oneshot(request).await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dropped_request_still_records_outcome() {
        let counter = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(DedupGate::new(
            Arc::new(MemoryIdempotencyStore::new()),
            &IdempotencyConfig::default(),
        ));
        let handler_counter = counter.clone();
        let app = Router::new()
            .route(
                "/api/v1/transactions/transfer",
                post(move || {
                    let counter = handler_counter.clone();
                    async move {
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                        counter.fetch_add(1, Ordering::SeqCst);
                        (StatusCode::CREATED, "{\"done\":true}")
                    }
                }),
            )
            .layer(middleware::from_fn_with_state(gate, idempotency_middleware));
        let user = Uuid::new_v4();

        // Client gives up long before the handler finishes
        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            app.clone().oneshot(transfer(user, Some("K"), "{}")),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let retry = app.oneshot(transfer(user, Some("K"), "{}")).await.unwrap();
        assert_eq!(retry.status(), StatusCode::CREATED);
        assert_eq!(retry.headers().get(REPLAYED_HEADER).unwrap(), "true");
        assert_eq!(body_string(retry).await, "{\"done\":true}");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
