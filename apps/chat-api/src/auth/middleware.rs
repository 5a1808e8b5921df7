//! Bearer-token extraction.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::error::ApiError;
use crate::AppState;

use super::identity::Identity;

/// Authenticated user extracted from the `Authorization: Bearer <token>` header.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?
            .ok_or_else(|| ApiError::unauthorized("Missing Authorization header"))?;

        let identity = state.identity.verify(token).await?;

        Ok(AuthUser {
            user_id: identity.user_id,
        })
    }
}

/// Read the bearer token from the `Authorization` header.
///
/// `Ok(None)` when the header is absent; an error when it is present but
/// not a bearer credential.
pub fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, ApiError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };

    value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| Some(t.trim()))
        .ok_or_else(|| ApiError::unauthorized("Invalid Authorization header format"))
}

/// Resolve the identity for a WebSocket upgrade.
///
/// Browsers cannot attach headers to WebSocket requests, so a `token` query
/// parameter is accepted as well. No token at all yields `Ok(None)`; a token
/// that fails verification is always an error.
pub async fn connection_identity(
    state: &AppState,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<Option<Identity>, ApiError> {
    let token = match bearer_token(headers)? {
        Some(token) => Some(token),
        None => query_token.filter(|t| !t.is_empty()),
    };

    match token {
        Some(token) => state.identity.verify(token).await.map(Some),
        None => Ok(None),
    }
}
