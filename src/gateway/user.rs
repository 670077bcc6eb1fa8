//! Caller identity
//!
//! Authentication happens upstream; the proxy forwards the authenticated
//! user as a UUID in `X-User-Id`.

use axum::{extract::FromRequestParts, http::HeaderMap, http::request::Parts};

use super::types::GatewayError;
use crate::ledger::UserId;

pub const USER_ID_HEADER: &str = "x-user-id";

pub fn user_id_from_headers(headers: &HeaderMap) -> Option<UserId> {
    headers
        .get(USER_ID_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Extractor rejecting anonymous requests with 401
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub UserId);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        user_id_from_headers(&parts.headers)
            .map(CurrentUser)
            .ok_or_else(GatewayError::unauthenticated)
    }
}
