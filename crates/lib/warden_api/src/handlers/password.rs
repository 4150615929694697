//! Password recovery request handlers.

use axum::extract::State;

use crate::AppState;
use crate::error::AppResult;
use crate::extract::Json;
use crate::middleware::client::Client;
use crate::models::{ForgotPasswordRequest, MessageResponse, ResetPasswordRequest};
use crate::services::password;

/// `POST /password/forgot`: email a recovery code.
pub async fn forgot_handler(
    State(state): State<AppState>,
    Client(client): Client,
    Json(body): Json<ForgotPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    Ok(Json(password::forgot(&state, body, &client).await?))
}

/// `POST /password/reset`: set a new password with a recovery code.
pub async fn reset_handler(
    State(state): State<AppState>,
    Client(client): Client,
    Json(body): Json<ResetPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    Ok(Json(password::reset(&state, body, &client).await?))
}
