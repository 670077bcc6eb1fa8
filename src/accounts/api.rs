//! Account HTTP handlers

use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::gateway::state::AppState;
use crate::gateway::types::{ApiResult, created, ok, path_id, validated};
use crate::gateway::user::CurrentUser;
use crate::ledger::{Account, AccountId, AccountStatus, AccountType, AccountUpdate};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAccountRequest {
    pub account_type: AccountType,
    #[validate(length(equal = 3))]
    pub currency: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateAccountRequest {
    pub account_type: Option<AccountType>,
    pub status: Option<AccountStatus>,
}

#[derive(Debug, Serialize)]
pub struct ClosedAccount {
    pub id: AccountId,
    pub closed: bool,
}

/// POST /api/v1/accounts
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    payload: Result<Json<CreateAccountRequest>, JsonRejection>,
) -> ApiResult<Account> {
    let req = validated(payload)?;
    let account = state
        .accounts
        .open_account(user_id, req.account_type, &req.currency)
        .await?;
    created(account)
}

/// GET /api/v1/accounts
pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
) -> ApiResult<Vec<Account>> {
    ok(state.accounts.list_accounts(user_id).await?)
}

/// GET /api/v1/accounts/{id}
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Account> {
    let id = path_id(id)?;
    ok(state.accounts.get_account(user_id, id).await?)
}

/// PATCH /api/v1/accounts/{id}
pub async fn update_account(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateAccountRequest>, JsonRejection>,
) -> ApiResult<Account> {
    let id = path_id(id)?;
    let req = validated(payload)?;
    let update = AccountUpdate {
        account_type: req.account_type,
        status: req.status,
    };
    ok(state.accounts.update_account(user_id, id, update).await?)
}

/// DELETE /api/v1/accounts/{id}
pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<ClosedAccount> {
    let id = path_id(id)?;
    state.accounts.close_account(user_id, id).await?;
    ok(ClosedAccount { id, closed: true })
}
