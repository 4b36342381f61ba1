use axum::extract::{FromRequestParts, OptionalFromRequestParts};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::session::Session;

use super::AppState;
use super::error::ApiError;

pub const ISSUER_KEY_HEADER: &str = "x-session-issuer-key";

/// Resolve the caller from `Authorization: Bearer <token>`.
impl FromRequestParts<AppState> for Session {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(ApiError::Unauthorized)?;
        state.sessions.resolve(token).ok_or(ApiError::Unauthorized)
    }
}

/// Anonymous callers get `None`; a token that resolves to nothing is still
/// rejected.
impl OptionalFromRequestParts<AppState> for Session {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Option<Self>, Self::Rejection> {
        if !parts.headers.contains_key(AUTHORIZATION) {
            return Ok(None);
        }
        let token = bearer_token(parts).ok_or(ApiError::Unauthorized)?;
        state.sessions.resolve(token).map(Some).ok_or(ApiError::Unauthorized)
    }
}

/// Value of the `x-session-issuer-key` header, if present and readable.
pub(super) fn issuer_key(headers: &HeaderMap) -> Option<&str> {
    headers.get(ISSUER_KEY_HEADER)?.to_str().ok()
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
