//! One-time code delivery and sign-in.

use tracing::{info, warn};
use warden_core::auth::otp::OtpOutcome;
use warden_core::auth::session::ClientInfo;
use warden_core::models::audit::AuditEventKind;
use warden_core::models::auth::{AuthMethod, OtpChannel, UserRecord};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::{OtpSendRequest, OtpSendResponse, OtpVerifyRequest, TokenResponse};
use crate::services::auth::issue_session;
use crate::services::validate::required;

/// Characters left visible at the end of a masked phone number.
const VISIBLE_DIGITS: usize = 4;

/// Prefix `phone` with the default country code unless it already has one.
pub fn normalize_phone(phone: &str, default_country_code: &str) -> String {
    let phone = phone.trim();
    if phone.starts_with('+') {
        phone.to_string()
    } else {
        format!("{default_country_code}{phone}")
    }
}

/// Mask all but the last four digits: `+525512345678` → `*********5678`.
pub fn mask_phone(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    let visible = chars.len().min(VISIBLE_DIGITS);
    let hidden = chars.len() - visible;
    "*".repeat(hidden) + &chars[hidden..].iter().collect::<String>()
}

/// Keep the first character of the local part and the domain.
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first: String = local.chars().take(1).collect();
            format!("{first}***@{domain}")
        }
        None => "***".to_string(),
    }
}

/// Resolve the addressed account and channel from a send/verify body.
async fn resolve(
    state: &AppState,
    phone: Option<&str>,
    email: Option<&str>,
) -> AppResult<(UserRecord, OtpChannel, String)> {
    if let Ok(phone) = required("phone", phone) {
        let user = state
            .store
            .find_user_by_phone(&phone)
            .await?
            .ok_or_else(|| AppError::NotFound("Phone not registered".into()))?;
        return Ok((user, OtpChannel::Sms, phone));
    }
    let email = required("phone or email", email)?;
    let user = state
        .store
        .find_user_by_email(&email)
        .await?
        .ok_or_else(|| AppError::NotFound("Email not registered".into()))?;
    Ok((user, OtpChannel::Email, email))
}

/// Issue a code and deliver it over the channel the request names.
pub async fn send(
    state: &AppState,
    req: OtpSendRequest,
    client: &ClientInfo,
) -> AppResult<OtpSendResponse> {
    let (user, channel, address) = resolve(state, req.phone.as_deref(), req.email.as_deref()).await?;
    let code = state.otp.issue(user.id, channel).await?;

    let (transport, destination, masked) = match channel {
        OtpChannel::Sms => {
            let destination = normalize_phone(&address, &state.config.default_country_code);
            let masked = mask_phone(&destination);
            (&state.sms, destination, masked)
        }
        OtpChannel::Email => (&state.email, address.clone(), mask_email(&address)),
    };

    let payload = format!("Your access code is: {code}");
    if let Err(e) = transport.send(&destination, &payload).await {
        warn!(user_id = %user.id, transport = transport.name(), error = %e, "one-time code delivery failed");
        return Err(e.into());
    }

    state.audit(
        client,
        AuditEventKind::OtpSent,
        Some(user.id),
        format!("One-time code sent via {}", channel.as_str()),
    );
    info!(user_id = %user.id, channel = channel.as_str(), "one-time code sent");
    Ok(OtpSendResponse {
        success: true,
        channel: channel.as_str().to_string(),
        destination: masked,
    })
}

/// Consume the latest code and sign in on a match.
pub async fn verify(
    state: &AppState,
    req: OtpVerifyRequest,
    client: &ClientInfo,
) -> AppResult<TokenResponse> {
    let code = required("code", req.code.as_deref())?;
    let (user, _, _) = resolve(state, req.phone.as_deref(), req.email.as_deref()).await?;

    match state.otp.verify(user.id, &code).await? {
        OtpOutcome::Verified => {}
        OtpOutcome::NoActiveCode => {
            return Err(AppError::NotFound("No active code".into()));
        }
        outcome @ (OtpOutcome::Expired | OtpOutcome::Mismatch) => {
            state.audit(
                client,
                AuditEventKind::OtpFailed,
                Some(user.id),
                format!("One-time code rejected ({outcome:?})"),
            );
            return Err(AppError::Unauthorized("Invalid or expired code".into()));
        }
    }

    let resp = issue_session(state, &user, AuthMethod::Otp, client).await?;
    state.audit(client, AuditEventKind::OtpLogin, Some(user.id), "One-time code login");
    Ok(resp)
}
