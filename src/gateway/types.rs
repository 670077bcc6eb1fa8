//! API response envelope and error mapping
//!
//! - `ApiResponse<T>`: unified response wrapper
//! - `error_codes`: numeric error code constants
//! - `GatewayError`: domain errors rendered onto the envelope

use axum::{
    Json,
    extract::{
        Path,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

use crate::accounts::AccountError;
use crate::transfer::TransferError;

// ============================================================================
// Unified API Response Format
// ============================================================================

/// Unified API response wrapper
///
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - error: machine-readable error name (errors only)
/// - data: payload (success only)
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: error_codes::SUCCESS,
            msg: "ok".to_string(),
            error: None,
            data: Some(data),
        }
    }

    pub fn error(code: i32, error: &str, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            error: Some(error.to_string()),
            data: None,
        }
    }
}

pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), GatewayError>;

/// 200 with `data`
pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::success(data))))
}

/// 201 with `data`
pub fn created<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::CREATED, Json(ApiResponse::success(data))))
}

/// Unwrap a JSON body and run its `validator` rules
pub fn validated<T: Validate>(payload: Result<Json<T>, JsonRejection>) -> Result<T, GatewayError> {
    let Json(body) = payload.map_err(|e| GatewayError::bad_request(e.body_text()))?;
    body.validate()
        .map_err(|e| GatewayError::bad_request(e.to_string()))?;
    Ok(body)
}

/// Unwrap a path id
pub fn path_id(path: Result<Path<Uuid>, PathRejection>) -> Result<Uuid, GatewayError> {
    path.map(|Path(id)| id)
        .map_err(|e| GatewayError::bad_request(e.body_text()))
}

/// Error envelope outside the `GatewayError` path (middleware, extractors)
pub fn error_response(
    status: StatusCode,
    code: i32,
    error: &'static str,
    msg: impl Into<String>,
) -> Response {
    (status, Json(ApiResponse::<()>::error(code, error, msg))).into_response()
}

// ============================================================================
// Error Codes
// ============================================================================

pub mod error_codes {
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const INSUFFICIENT_BALANCE: i32 = 1002;
    pub const BUSINESS_RULE: i32 = 1003;
    pub const DUPLICATE_REQUEST: i32 = 1009;

    // Auth errors (2xxx)
    pub const MISSING_AUTH: i32 = 2001;
    pub const FORBIDDEN: i32 = 2003;

    // Resource errors (4xxx)
    pub const NOT_FOUND: i32 = 4004;
    pub const STATE_CONFLICT: i32 = 4009;
    pub const RATE_LIMITED: i32 = 4291;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
}

// ============================================================================
// GatewayError
// ============================================================================

/// Error leaving a handler. Infrastructure detail is logged here and never
/// sent to the client.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("{msg}")]
    Api {
        status: StatusCode,
        code: i32,
        error: &'static str,
        msg: String,
    },
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Account(#[from] AccountError),
}

impl GatewayError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        GatewayError::Api {
            status: StatusCode::BAD_REQUEST,
            code: error_codes::INVALID_PARAMETER,
            error: "INVALID_PARAMETER",
            msg: msg.into(),
        }
    }

    pub fn unauthenticated() -> Self {
        GatewayError::Api {
            status: StatusCode::UNAUTHORIZED,
            code: error_codes::MISSING_AUTH,
            error: "MISSING_AUTH",
            msg: "Missing or invalid X-User-Id header".to_string(),
        }
    }

    fn parts(&self) -> (StatusCode, i32, &'static str, String) {
        match self {
            GatewayError::Api {
                status,
                code,
                error,
                msg,
            } => (*status, *code, *error, msg.clone()),
            GatewayError::Transfer(e) => {
                let status = status_of(e.http_status());
                let code = match e {
                    TransferError::InsufficientBalance => error_codes::INSUFFICIENT_BALANCE,
                    _ => code_for_status(status),
                };
                (status, code, e.code(), public_message(status, e.to_string()))
            }
            GatewayError::Account(e) => {
                let status = status_of(e.http_status());
                (
                    status,
                    code_for_status(status),
                    e.code(),
                    public_message(status, e.to_string()),
                )
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code, error, msg) = self.parts();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error, detail = %self, "Request failed");
        }
        error_response(status, code, error, msg)
    }
}

fn status_of(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn code_for_status(status: StatusCode) -> i32 {
    match status {
        StatusCode::BAD_REQUEST => error_codes::INVALID_PARAMETER,
        StatusCode::UNAUTHORIZED => error_codes::MISSING_AUTH,
        StatusCode::FORBIDDEN => error_codes::FORBIDDEN,
        StatusCode::NOT_FOUND => error_codes::NOT_FOUND,
        StatusCode::CONFLICT => error_codes::STATE_CONFLICT,
        StatusCode::UNPROCESSABLE_ENTITY => error_codes::BUSINESS_RULE,
        StatusCode::SERVICE_UNAVAILABLE => error_codes::SERVICE_UNAVAILABLE,
        _ => error_codes::INTERNAL_ERROR,
    }
}

fn public_message(status: StatusCode, detail: String) -> String {
    match status {
        StatusCode::SERVICE_UNAVAILABLE => {
            "Temporarily unavailable, retry with the same idempotency key".to_string()
        }
        s if s.is_server_error() => "Internal error".to_string(),
        _ => detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use uuid::Uuid;

    async fn render(err: GatewayError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_business_error_keeps_message() {
        let (status, body) = render(TransferError::InsufficientBalance.into()).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], error_codes::INSUFFICIENT_BALANCE);
        assert_eq!(body["error"], "INSUFFICIENT_BALANCE");
        assert!(body.get("data").is_none());
    }

    #[tokio::test]
    async fn test_transient_maps_to_try_again() {
        let (status, body) = render(TransferError::Transient("40001".into()).into()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "TRY_AGAIN");
        assert!(!body["msg"].as_str().unwrap().contains("40001"));
    }

    #[tokio::test]
    async fn test_database_detail_not_exposed() {
        let (status, body) =
            render(AccountError::DatabaseError("password authentication failed".into()).into())
                .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["msg"], "Internal error");
    }

    #[tokio::test]
    async fn test_not_found_code() {
        let (status, body) = render(AccountError::AccountNotFound(Uuid::new_v4()).into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], error_codes::NOT_FOUND);
    }

    #[test]
    fn test_success_envelope_shape() {
        let json = serde_json::to_value(ApiResponse::success(42)).unwrap();
        assert_eq!(json, serde_json::json!({"code": 0, "msg": "ok", "data": 42}));
    }
}
