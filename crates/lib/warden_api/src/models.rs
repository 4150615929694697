//! Request and response bodies.
//!
//! Wire shapes use camelCase. Request fields the handlers validate themselves
//! are optional so a missing field is answered with 400 rather than a
//! deserialization rejection.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warden_core::models::auth::{Principal, Role};
use warden_core::models::webauthn::BiometricKind;
use warden_core::webauthn::{AssertionResponse, AttestationResponse};

/// Error body returned for every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Principal summary returned after authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: Role,
    pub enrollment_id: Option<String>,
    pub program: Option<String>,
    pub semester: Option<String>,
}

impl From<Principal> for PrincipalSummary {
    fn from(p: Principal) -> Self {
        Self {
            id: p.id,
            name: p.name,
            email: p.email,
            phone: p.phone,
            role: p.role,
            enrollment_id: p.enrollment_id,
            program: p.program,
            semester: p.semester,
        }
    }
}

/// Access/refresh token pair plus the principal it was minted for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access-token lifetime in seconds.
    pub expires_in: i64,
    pub user: PrincipalSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Password authentication
// ---------------------------------------------------------------------------

/// `POST /auth/login`. `identifier` is an email for Visitors and an
/// enrollment id for every other role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoginRequest {
    pub identifier: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub paternal_surname: Option<String>,
    pub maternal_surname: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub message: String,
    pub user: PrincipalSummary,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RefreshRequest {
    pub user_id: Option<Uuid>,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeResponse {
    pub user: PrincipalSummary,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmailQuery {
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhoneQuery {
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExistsResponse {
    pub exists: bool,
}

// ---------------------------------------------------------------------------
// One-time codes
// ---------------------------------------------------------------------------

/// `POST /otp/send`. Exactly one of `phone` (SMS) or `email` is used; phone
/// takes precedence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OtpSendRequest {
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpSendResponse {
    pub success: bool,
    pub channel: String,
    /// Destination with all but the trailing characters masked.
    pub destination: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OtpVerifyRequest {
    pub phone: Option<String>,
    pub email: Option<String>,
    pub code: Option<String>,
}

// ---------------------------------------------------------------------------
// Password recovery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgotPasswordRequest {
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResetPasswordRequest {
    pub email: Option<String>,
    pub code: Option<String>,
    pub new_password: Option<String>,
}

// ---------------------------------------------------------------------------
// WebAuthn
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebAuthnRegisterOptionsRequest {
    pub kind: BiometricKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebAuthnRegisterVerifyRequest {
    pub credential: AttestationResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebAuthnRegisterVerifyResponse {
    pub success: bool,
    pub kind: BiometricKind,
    /// Whether an earlier credential was overwritten.
    pub replaced: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebAuthnAuthOptionsRequest {
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebAuthnAuthVerifyRequest {
    pub email: String,
    pub credential: AssertionResponse,
}

/// `POST /webauthn/register/biometric/options`: creation options for an
/// account that does not exist yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiometricSignUpOptionsRequest {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    pub kind: BiometricKind,
}

/// `POST /webauthn/register/biometric`: the registration form plus the
/// attestation answering a sign-up challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiometricSignUpRequest {
    #[serde(flatten)]
    pub account: RegisterRequest,
    pub credential: AttestationResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiometricSignUpResponse {
    pub success: bool,
    pub message: String,
    pub kind: BiometricKind,
    pub user: PrincipalSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiometricKindResponse {
    pub kind: BiometricKind,
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// `PATCH /users/me`. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileUpdateRequest {
    pub name: Option<String>,
    pub paternal_surname: Option<String>,
    pub maternal_surname: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub enrollment_id: Option<String>,
}
