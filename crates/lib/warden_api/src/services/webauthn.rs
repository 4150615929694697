//! WebAuthn registration and sign-in around the ceremony engine.

use tracing::{info, warn};
use uuid::Uuid;
use warden_core::auth::session::ClientInfo;
use warden_core::models::audit::AuditEventKind;
use warden_core::models::auth::{AuthMethod, Principal, Role, UserRecord};
use warden_core::models::webauthn::BiometricKind;
use warden_core::uuid::uuidv7;
use warden_core::webauthn::{
    AssertionResponse, AttestationResponse, CreationOptions, RequestOptions,
};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::{
    BiometricKindResponse, BiometricSignUpOptionsRequest, BiometricSignUpRequest,
    BiometricSignUpResponse, TokenResponse, WebAuthnRegisterVerifyResponse,
};
use crate::services::auth::{issue_session, visitor_from_form};
use crate::services::validate::check_email;

async fn user_by_id(state: &AppState, user_id: Uuid) -> AppResult<UserRecord> {
    state
        .store
        .find_user_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired token".into()))
}

async fn user_by_email(state: &AppState, email: &str) -> AppResult<UserRecord> {
    state
        .store
        .find_user_by_email(email.trim())
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))
}

/// Creation options for the authenticated principal.
pub async fn register_options(
    state: &AppState,
    user_id: Uuid,
    kind: BiometricKind,
) -> AppResult<CreationOptions> {
    let user = user_by_id(state, user_id).await?;
    Ok(state.webauthn.registration_options(&user.principal(), kind))
}

/// Verify an attestation and bind the credential, replacing any earlier one.
pub async fn register_verify(
    state: &AppState,
    user_id: Uuid,
    credential: &AttestationResponse,
    client: &ClientInfo,
) -> AppResult<WebAuthnRegisterVerifyResponse> {
    let registered = match state.webauthn.verify_registration(user_id, credential).await {
        Ok(r) => r,
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "webauthn registration rejected");
            state.audit(
                client,
                AuditEventKind::WebAuthnRejected,
                Some(user_id),
                format!("Registration rejected: {e}"),
            );
            return Err(e.into());
        }
    };

    let kind = registered.credential.kind;
    state.audit(
        client,
        AuditEventKind::WebAuthnRegistered,
        Some(user_id),
        format!(
            "Biometric credential registered ({}{})",
            kind.as_str(),
            if registered.replaced { ", replaced" } else { "" }
        ),
    );
    Ok(WebAuthnRegisterVerifyResponse {
        success: true,
        kind,
        replaced: registered.replaced,
    })
}

/// Creation options for a new Visitor account. The account id is reserved
/// now and used when the sign-up completes.
pub async fn sign_up_options(
    state: &AppState,
    req: BiometricSignUpOptionsRequest,
) -> AppResult<CreationOptions> {
    let email = req.email.trim().to_ascii_lowercase();
    check_email(&email)?;
    if state.store.find_user_by_email(&email).await?.is_some() {
        return Err(AppError::Conflict("Email already registered".into()));
    }
    let name = req
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| email.clone());
    let principal = Principal {
        id: uuidv7(),
        name,
        email,
        phone: None,
        role: Role::Visitor,
        enrollment_id: None,
        program: None,
        semester: None,
    };
    Ok(state.webauthn.enrollment_options(&principal, req.kind))
}

/// Create a Visitor account and bind the attested credential to it in one
/// step. Nothing is stored when the form or the attestation is rejected.
pub async fn sign_up(
    state: &AppState,
    req: BiometricSignUpRequest,
    client: &ClientInfo,
) -> AppResult<BiometricSignUpResponse> {
    let new_user = visitor_from_form(state, req.account).await?;
    let credential = match state.webauthn.verify_enrollment(&req.credential) {
        Ok(c) => c,
        Err(e) => {
            warn!(email = %new_user.email, error = %e, "biometric sign-up rejected");
            state.audit(
                client,
                AuditEventKind::WebAuthnRejected,
                None,
                format!("Sign-up attestation rejected: {e}"),
            );
            return Err(e.into());
        }
    };

    let user = state
        .store
        .create_user_with_credential(new_user, &credential)
        .await?;
    state.audit(
        client,
        AuditEventKind::Registration,
        Some(user.id),
        format!(
            "Visitor registered with biometric credential ({}): {}",
            credential.kind.as_str(),
            user.email
        ),
    );
    info!(user_id = %user.id, kind = credential.kind.as_str(), "visitor registered with biometric credential");
    Ok(BiometricSignUpResponse {
        success: true,
        message: "Visitor registered with biometric credential".into(),
        kind: credential.kind,
        user: user.principal().into(),
    })
}

/// Request options restricted to the account's stored credential.
pub async fn auth_options(state: &AppState, email: &str) -> AppResult<RequestOptions> {
    let user = user_by_email(state, email).await?;
    Ok(state.webauthn.authentication_options(user.id).await?)
}

/// Verify an assertion and sign in.
pub async fn auth_verify(
    state: &AppState,
    email: &str,
    credential: &AssertionResponse,
    client: &ClientInfo,
) -> AppResult<TokenResponse> {
    let user = user_by_email(state, email).await?;
    if let Err(e) = state.webauthn.verify_authentication(user.id, credential).await {
        warn!(user_id = %user.id, error = %e, "webauthn assertion rejected");
        state.audit(
            client,
            AuditEventKind::WebAuthnRejected,
            Some(user.id),
            format!("Assertion rejected: {e}"),
        );
        return Err(e.into());
    }

    let resp = issue_session(state, &user, AuthMethod::WebAuthn, client).await?;
    state.audit(
        client,
        AuditEventKind::WebAuthnLogin,
        Some(user.id),
        "Biometric login",
    );
    Ok(resp)
}

/// Biometric tag registered for the account.
pub async fn biometric_kind(state: &AppState, email: &str) -> AppResult<BiometricKindResponse> {
    let user = user_by_email(state, email).await?;
    let credential = state
        .store
        .find_credential(user.id)
        .await?
        .ok_or_else(|| AppError::NotFound("No biometric credential registered".into()))?;
    Ok(BiometricKindResponse {
        kind: credential.kind,
    })
}
