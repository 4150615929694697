//! Password recovery by emailed code.

use tracing::{info, warn};
use warden_core::auth::ensure_active;
use warden_core::auth::password::{hash_password, validate_new_password};
use warden_core::auth::recovery::RECOVERY_CODE_TTL_MINUTES;
use warden_core::auth::session::ClientInfo;
use warden_core::models::audit::AuditEventKind;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::{ForgotPasswordRequest, MessageResponse, ResetPasswordRequest};
use crate::services::validate::required;

const FORGOT_RESPONSE: &str = "If the address is registered, a recovery code has been sent";

/// Issue and email a recovery code. The answer does not reveal whether the
/// address is registered, and delivery failures are only logged.
pub async fn forgot(
    state: &AppState,
    req: ForgotPasswordRequest,
    client: &ClientInfo,
) -> AppResult<MessageResponse> {
    let email = required("email", req.email.as_deref())?;
    let Some(user) = state.store.find_user_by_email(&email).await? else {
        return Ok(MessageResponse::new(FORGOT_RESPONSE));
    };
    if !user.status.is_active() {
        warn!(user_id = %user.id, status = user.status.as_str(), "recovery refused for account status");
        state.audit(
            client,
            AuditEventKind::PasswordResetRequested,
            Some(user.id),
            format!("Password recovery refused ({} account)", user.status.as_str()),
        );
        return Ok(MessageResponse::new(FORGOT_RESPONSE));
    }

    let code = state.recovery.issue(user.id).await?;
    let payload = format!(
        "Your password recovery code is {code}. It expires in {RECOVERY_CODE_TTL_MINUTES} minutes."
    );
    if let Err(e) = state.email.send(&user.email, &payload).await {
        warn!(user_id = %user.id, transport = state.email.name(), error = %e, "recovery code delivery failed");
    }

    state.audit(
        client,
        AuditEventKind::PasswordResetRequested,
        Some(user.id),
        "Password recovery requested",
    );
    Ok(MessageResponse::new(FORGOT_RESPONSE))
}

/// Set a new password with a valid recovery code. The code is consumed
/// before the password changes, so it can be redeemed once. Ends every
/// session and revokes every refresh token of the account.
pub async fn reset(
    state: &AppState,
    req: ResetPasswordRequest,
    client: &ClientInfo,
) -> AppResult<MessageResponse> {
    let email = required("email", req.email.as_deref())?;
    let code = required("code", req.code.as_deref())?;
    let new_password = required("newPassword", req.new_password.as_deref())?;
    validate_new_password(&new_password)?;

    let invalid = || AppError::Validation("Invalid or expired recovery code".into());
    let user = state
        .store
        .find_user_by_email(&email)
        .await?
        .ok_or_else(invalid)?;
    ensure_active(&user)?;
    let password_hash = hash_password(&new_password)?;
    if !state.recovery.redeem(user.id, &code).await? {
        return Err(invalid());
    }

    state
        .store
        .update_password_hash(user.id, &password_hash)
        .await?;
    state.refresh.revoke_all(user.id).await?;
    state.sessions.close_all(user.id).await?;

    state.audit(
        client,
        AuditEventKind::PasswordReset,
        Some(user.id),
        "Password reset",
    );
    info!(user_id = %user.id, "password reset");
    Ok(MessageResponse::new("Password updated"))
}
