//! One-time code request handlers.

use axum::extract::State;

use crate::AppState;
use crate::error::AppResult;
use crate::extract::Json;
use crate::middleware::client::Client;
use crate::models::{OtpSendRequest, OtpSendResponse, OtpVerifyRequest, TokenResponse};
use crate::services::otp;

/// `POST /otp/send`: issue and deliver a code.
pub async fn send_handler(
    State(state): State<AppState>,
    Client(client): Client,
    Json(body): Json<OtpSendRequest>,
) -> AppResult<Json<OtpSendResponse>> {
    Ok(Json(otp::send(&state, body, &client).await?))
}

/// `POST /otp/verify`: consume the latest code and sign in.
pub async fn verify_handler(
    State(state): State<AppState>,
    Client(client): Client,
    Json(body): Json<OtpVerifyRequest>,
) -> AppResult<Json<TokenResponse>> {
    Ok(Json(otp::verify(&state, body, &client).await?))
}
