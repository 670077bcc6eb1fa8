//! Transfer API Layer
//!
//! HTTP handlers for transfers and transaction history. The dedup middleware
//! sits in front of `create_transfer`; handlers here never see duplicates.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::error::TransferError;
use super::types::TransferRequest;
use crate::gateway::state::AppState;
use crate::gateway::types::{ApiResult, GatewayError, created, ok, path_id, validated};
use crate::gateway::user::CurrentUser;
use crate::ledger::{AccountId, TransactionFilter, TransactionRecord};

// ============================================================================
// API Request Types
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct TransferApiRequest {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    /// Amount as string (to avoid float precision issues)
    #[validate(length(min = 1, max = 32))]
    pub amount: String,
    #[validate(length(max = 255))]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransactionListQuery {
    pub account_id: AccountId,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Strict amount parsing
///
/// Rejects `.5`, `5.`, exponents and signs. Zero and precision checks are
/// left to the orchestrator.
pub fn parse_amount(s: &str) -> Result<Decimal, TransferError> {
    let s = s.trim();
    let well_formed = !s.is_empty()
        && !s.starts_with('.')
        && !s.ends_with('.')
        && s.chars().all(|c| c.is_ascii_digit() || c == '.')
        && s.matches('.').count() <= 1;
    if !well_formed {
        return Err(TransferError::InvalidAmount);
    }
    Decimal::from_str(s).map_err(|_| TransferError::InvalidAmount)
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/transactions/transfer
pub async fn create_transfer(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    payload: Result<Json<TransferApiRequest>, JsonRejection>,
) -> ApiResult<TransactionRecord> {
    let req = validated(payload)?;
    let amount = parse_amount(&req.amount)?;

    let mut request =
        TransferRequest::new(req.from_account_id, req.to_account_id, amount).initiated_by(user_id);
    if let Some(description) = req.description {
        request = request.with_description(description);
    }

    let record = state.orchestrator.transfer(request).await?;
    created(record)
}

/// GET /api/v1/transactions?account_id=&limit=&offset=
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    query: Result<Query<TransactionListQuery>, QueryRejection>,
) -> ApiResult<Vec<TransactionRecord>> {
    let Query(query) = query.map_err(|e| GatewayError::bad_request(e.body_text()))?;
    let filter = TransactionFilter::new(query.limit, query.offset);
    ok(state
        .queries
        .list_by_account(user_id, query.account_id, filter)
        .await?)
}

/// GET /api/v1/transactions/{id}
pub async fn get_transaction(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<TransactionRecord> {
    let id = path_id(id)?;
    ok(state.queries.get_transaction(user_id, id).await?)
}
