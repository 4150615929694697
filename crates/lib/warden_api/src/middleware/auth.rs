//! Authentication middleware: Bearer token extraction, JWT verification and
//! session-ledger check.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;
use warden_core::models::auth::TokenClaims;

use crate::AppState;
use crate::error::AppError;

/// Verified caller, stored in request extensions by [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub claims: TokenClaims,
}

/// Extract the raw token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing authorization header".into()))?;
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Invalid authorization scheme".into()))
}

/// Axum middleware: verifies the bearer JWT, requires it to belong to the
/// caller's current open session, and injects [`AuthenticatedUser`].
///
/// A token whose session was closed by logout or password reset is refused
/// even before it expires.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(request.headers())?;

    let claims = state
        .tokens
        .verify(token)
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired token".into()))?;
    let id = claims
        .principal_id()
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired token".into()))?;

    if !state.sessions.validate(id, token).await? {
        return Err(AppError::Unauthorized("Invalid or expired token".into()));
    }

    request
        .extensions_mut()
        .insert(AuthenticatedUser { id, claims });

    Ok(next.run(request).await)
}
