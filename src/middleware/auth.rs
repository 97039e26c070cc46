use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::error::AppError;
use crate::services::Caller;
use crate::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const ADMIN_ROLE: &str = "admin";

/// Resolves the authenticated caller from the headers set by the upstream
/// identity layer.
pub fn caller_from_headers(headers: &HeaderMap) -> Result<Caller, AppError> {
    let raw = headers
        .get(USER_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing caller identity".to_string()))?;

    let user_id = raw
        .trim()
        .parse::<i64>()
        .map_err(|_| AppError::Unauthorized("invalid caller identity".to_string()))?;

    let is_admin = headers
        .get(USER_ROLE_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(|role| role.trim().eq_ignore_ascii_case(ADMIN_ROLE))
        .unwrap_or(false);

    Ok(Caller { user_id, is_admin })
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        caller_from_headers(&parts.headers)
    }
}

pub async fn admin_auth<B>(
    State(state): State<AppState>,
    req: Request<B>,
    next: Next<B>,
) -> Result<Response, StatusCode> {
    let auth_header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok());

    match auth_header {
        Some(auth) if auth.strip_prefix("Bearer ") == Some(&*state.admin_api_key) => {
            Ok(next.run(req).await)
        }
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}
