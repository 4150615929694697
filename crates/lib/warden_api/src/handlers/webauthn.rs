//! WebAuthn ceremony handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use warden_core::webauthn::{CreationOptions, RequestOptions};

use crate::AppState;
use crate::error::AppResult;
use crate::extract::Json;
use crate::middleware::auth::AuthenticatedUser;
use crate::middleware::client::Client;
use crate::models::{
    BiometricKindResponse, BiometricSignUpOptionsRequest, BiometricSignUpRequest,
    BiometricSignUpResponse, TokenResponse, WebAuthnAuthOptionsRequest, WebAuthnAuthVerifyRequest,
    WebAuthnRegisterOptionsRequest, WebAuthnRegisterVerifyRequest, WebAuthnRegisterVerifyResponse,
};
use crate::services::validate::required;
use crate::services::webauthn;

/// `POST /webauthn/register/options`: creation options for the caller.
pub async fn register_options_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Json(body): Json<WebAuthnRegisterOptionsRequest>,
) -> AppResult<Json<CreationOptions>> {
    Ok(Json(webauthn::register_options(&state, user.id, body.kind).await?))
}

/// `POST /webauthn/register/verify`: bind the attested credential.
pub async fn register_verify_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Client(client): Client,
    Json(body): Json<WebAuthnRegisterVerifyRequest>,
) -> AppResult<Json<WebAuthnRegisterVerifyResponse>> {
    let resp = webauthn::register_verify(&state, user.id, &body.credential, &client).await?;
    Ok(Json(resp))
}

/// `POST /webauthn/register/biometric/options`: creation options for a new account.
pub async fn sign_up_options_handler(
    State(state): State<AppState>,
    Json(body): Json<BiometricSignUpOptionsRequest>,
) -> AppResult<Json<CreationOptions>> {
    Ok(Json(webauthn::sign_up_options(&state, body).await?))
}

/// `POST /webauthn/register/biometric`: create a Visitor account bound to
/// the attested credential.
pub async fn sign_up_handler(
    State(state): State<AppState>,
    Client(client): Client,
    Json(body): Json<BiometricSignUpRequest>,
) -> AppResult<(StatusCode, Json<BiometricSignUpResponse>)> {
    let resp = webauthn::sign_up(&state, body, &client).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

/// `POST /webauthn/auth/options`: request options for an account.
pub async fn auth_options_handler(
    State(state): State<AppState>,
    Json(body): Json<WebAuthnAuthOptionsRequest>,
) -> AppResult<Json<RequestOptions>> {
    let email = required("email", body.email.as_deref())?;
    Ok(Json(webauthn::auth_options(&state, &email).await?))
}

/// `POST /webauthn/auth/verify`: verify an assertion and sign in.
pub async fn auth_verify_handler(
    State(state): State<AppState>,
    Client(client): Client,
    Json(body): Json<WebAuthnAuthVerifyRequest>,
) -> AppResult<Json<TokenResponse>> {
    let resp = webauthn::auth_verify(&state, &body.email, &body.credential, &client).await?;
    Ok(Json(resp))
}

/// `GET /webauthn/kind/{email}`: registered biometric tag.
pub async fn kind_handler(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> AppResult<Json<BiometricKindResponse>> {
    Ok(Json(webauthn::biometric_kind(&state, &email).await?))
}
