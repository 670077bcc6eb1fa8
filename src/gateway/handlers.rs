//! Health check handler

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use serde::Serialize;

use super::state::AppState;
use super::types::{ApiResponse, error_codes};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub timestamp_ms: i64,
    pub ledger: &'static str,
    pub cache: &'static str,
}

/// GET /health
///
/// 503 when the ledger database does not answer. Cache health is not
/// checked since the cache degrades to store reads.
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    if let Some(db) = &state.pg_db {
        if let Err(e) = db.health_check().await {
            tracing::error!(error = %e, "[HEALTH] PostgreSQL ping failed");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse {
                    code: error_codes::SERVICE_UNAVAILABLE,
                    msg: "unavailable".to_string(),
                    error: Some("SERVICE_UNAVAILABLE".to_string()),
                    data: None,
                }),
            );
        }
    }

    (
        StatusCode::OK,
        Json(ApiResponse::success(HealthResponse {
            timestamp_ms: Utc::now().timestamp_millis(),
            ledger: state.orchestrator.store().name(),
            cache: state.cache.backend_name(),
        })),
    )
}
