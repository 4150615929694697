//! Audit event models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Security-relevant event kinds recorded by the audit sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    Registration,
    LoginSucceeded,
    LoginFailed,
    TokenRefreshed,
    Logout,
    OAuthLogin,
    WebAuthnRegistered,
    WebAuthnLogin,
    WebAuthnRejected,
    OtpSent,
    OtpLogin,
    OtpFailed,
    PasswordResetRequested,
    PasswordReset,
    ProfileUpdated,
}

impl AuditEventKind {
    /// Database text representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventKind::Registration => "registration",
            AuditEventKind::LoginSucceeded => "login_succeeded",
            AuditEventKind::LoginFailed => "login_failed",
            AuditEventKind::TokenRefreshed => "token_refreshed",
            AuditEventKind::Logout => "logout",
            AuditEventKind::OAuthLogin => "oauth_login",
            AuditEventKind::WebAuthnRegistered => "webauthn_registered",
            AuditEventKind::WebAuthnLogin => "webauthn_login",
            AuditEventKind::WebAuthnRejected => "webauthn_rejected",
            AuditEventKind::OtpSent => "otp_sent",
            AuditEventKind::OtpLogin => "otp_login",
            AuditEventKind::OtpFailed => "otp_failed",
            AuditEventKind::PasswordResetRequested => "password_reset_requested",
            AuditEventKind::PasswordReset => "password_reset",
            AuditEventKind::ProfileUpdated => "profile_updated",
        }
    }
}

/// One append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub user_id: Option<Uuid>,
    pub kind: AuditEventKind,
    pub description: String,
    pub ip: Option<String>,
    pub device: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    /// New event stamped with the current time.
    pub fn new(kind: AuditEventKind, user_id: Option<Uuid>, description: impl Into<String>) -> Self {
        Self {
            user_id,
            kind,
            description: description.into(),
            ip: None,
            device: None,
            occurred_at: Utc::now(),
        }
    }

    /// Attach the caller's origin address.
    pub fn with_ip(mut self, ip: Option<String>) -> Self {
        self.ip = ip;
        self
    }

    /// Attach the caller's device description.
    pub fn with_device(mut self, device: Option<String>) -> Self {
        self.device = device;
        self
    }
}
