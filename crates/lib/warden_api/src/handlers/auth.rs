//! Password authentication request handlers.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::extract::{Json, Query};
use crate::middleware::auth::{AuthenticatedUser, bearer_token};
use crate::middleware::client::Client;
use crate::models::{
    EmailQuery, ExistsResponse, LoginRequest, MeResponse, MessageResponse, PhoneQuery,
    RefreshRequest, RegisterRequest, RegisterResponse, TokenResponse,
};
use crate::services::auth;

/// `POST /auth/register`: create a Visitor account.
pub async fn register_handler(
    State(state): State<AppState>,
    Client(client): Client,
    Json(body): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<RegisterResponse>)> {
    let resp = auth::register(&state, body, &client).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

/// `POST /auth/login`: authenticate with identifier, password and role.
pub async fn login_handler(
    State(state): State<AppState>,
    Client(client): Client,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    let resp = auth::login(&state, body, &client).await?;
    Ok(Json(resp))
}

/// `POST /auth/refresh`: exchange a refresh token for a new token pair.
pub async fn refresh_handler(
    State(state): State<AppState>,
    Client(client): Client,
    Json(body): Json<RefreshRequest>,
) -> AppResult<Json<TokenResponse>> {
    let resp = auth::refresh(&state, body, &client).await?;
    Ok(Json(resp))
}

/// `POST /auth/logout`: close sessions and revoke refresh tokens of the
/// bearer token's owner.
pub async fn logout_handler(
    State(state): State<AppState>,
    Client(client): Client,
    headers: HeaderMap,
) -> AppResult<Json<MessageResponse>> {
    let token = bearer_token(&headers).map_err(|e| match e {
        AppError::Unauthorized(m) => AppError::Validation(m),
        other => other,
    })?;
    auth::logout(&state, token, &client).await?;
    Ok(Json(MessageResponse::new("Logged out")))
}

/// `GET /auth/me`: principal of the current session.
pub async fn me_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
) -> AppResult<Json<MeResponse>> {
    let user = auth::me(&state, user.id).await?;
    Ok(Json(MeResponse { user }))
}

/// `GET /auth/check-email?email=`: whether an account uses the address.
pub async fn check_email_handler(
    State(state): State<AppState>,
    Query(query): Query<EmailQuery>,
) -> AppResult<Json<ExistsResponse>> {
    Ok(Json(auth::email_exists(&state, query.email.as_deref()).await?))
}

/// `GET /auth/check-phone?phone=`: whether an account uses the number.
pub async fn check_phone_handler(
    State(state): State<AppState>,
    Query(query): Query<PhoneQuery>,
) -> AppResult<Json<ExistsResponse>> {
    Ok(Json(auth::phone_exists(&state, query.phone.as_deref()).await?))
}
