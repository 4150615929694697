//! Authentication domain models.
//!
//! These are internal domain models, distinct from the API request/response
//! shapes in `warden_api::models` (which carry `#[serde(rename)]` for camelCase).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Password column value for accounts without a password credential.
///
/// Federated accounts are provisioned with this marker; password login must be
/// refused for them without ever reaching the hash verifier.
pub const NO_PASSWORD_SENTINEL: &str = "!no-password-credential";

/// Fixed role catalog.
///
/// Ordered from least to most privileged; `Visitor` is the default for
/// self-registered and federated accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Visitor,
    Student,
    Teacher,
    Librarian,
    Administrator,
}

impl Role {
    /// Lowest-privilege role, assigned to provisioned accounts.
    pub const DEFAULT: Role = Role::Visitor;

    /// All roles, in privilege order.
    pub const ALL: [Role; 5] = [
        Role::Visitor,
        Role::Student,
        Role::Teacher,
        Role::Librarian,
        Role::Administrator,
    ];

    /// Database text representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Visitor => "visitor",
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Librarian => "librarian",
            Role::Administrator => "administrator",
        }
    }

    /// Whether this role signs in with an email address (as opposed to an
    /// enrollment id).
    pub fn signs_in_with_email(&self) -> bool {
        matches!(self, Role::Visitor)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Visitor => "Visitor",
            Role::Student => "Student",
            Role::Teacher => "Teacher",
            Role::Librarian => "Librarian",
            Role::Administrator => "Administrator",
        };
        f.write_str(name)
    }
}

/// Error returned when parsing an unknown role name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    /// Accepts both the display form (`Student`) and the database form (`student`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

/// How a principal proved its identity. Carried in access-token claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Password,
    Refresh,
    OAuth,
    WebAuthn,
    Otp,
}

impl AuthMethod {
    /// Access-token lifetime for tokens minted by this method.
    pub fn access_ttl(&self) -> chrono::Duration {
        match self {
            AuthMethod::Password | AuthMethod::Refresh => chrono::Duration::minutes(15),
            AuthMethod::OAuth | AuthMethod::WebAuthn | AuthMethod::Otp => {
                chrono::Duration::hours(1)
            }
        }
    }

    /// Database / audit text representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Password => "password",
            AuthMethod::Refresh => "refresh",
            AuthMethod::OAuth => "oauth",
            AuthMethod::WebAuthn => "webauthn",
            AuthMethod::Otp => "otp",
        }
    }
}

/// A resolved, authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: Role,
    pub enrollment_id: Option<String>,
    pub program: Option<String>,
    pub semester: Option<String>,
}

/// Stored user row, including credential material.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: Uuid,
    pub role: Role,
    pub name: String,
    pub paternal_surname: Option<String>,
    pub maternal_surname: Option<String>,
    pub email: String,
    pub phone: Option<String>,
    pub enrollment_id: Option<String>,
    pub program: Option<String>,
    pub semester: Option<String>,
    pub password_hash: String,
    pub oauth_provider: Option<String>,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    /// Project the stored row onto the principal shape shared by every
    /// authentication method.
    pub fn principal(&self) -> Principal {
        Principal {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            role: self.role,
            enrollment_id: self.enrollment_id.clone(),
            program: self.program.clone(),
            semester: self.semester.clone(),
        }
    }

    /// Whether the account has a usable password credential.
    pub fn has_password(&self) -> bool {
        self.password_hash != NO_PASSWORD_SENTINEL
    }
}

/// Input for creating a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub role: Role,
    pub name: String,
    pub paternal_surname: Option<String>,
    pub maternal_surname: Option<String>,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub oauth_provider: Option<String>,
}

/// JWT claims embedded in access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: principal id.
    pub sub: String,
    /// Role at issuance.
    pub role: Role,
    /// How the principal authenticated.
    pub method: AuthMethod,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiry (unix timestamp).
    pub exp: i64,
    /// Unique token id; two tokens minted in the same second still differ.
    pub jti: String,
}

impl TokenClaims {
    /// Parse the subject back into a principal id.
    pub fn principal_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }
}

/// Administrative state of an account. Only active accounts may sign in or
/// recover their password.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccountStatus {
    #[default]
    Active,
    Inactive,
    Blocked,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Inactive => "inactive",
            AccountStatus::Blocked => "blocked",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, AccountStatus::Active)
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "inactive" => Ok(AccountStatus::Inactive),
            "blocked" => Ok(AccountStatus::Blocked),
            other => Err(format!("unknown account status '{other}'")),
        }
    }
}

/// Lifecycle state of a refresh token row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Active,
    Revoked,
}

impl TokenState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenState::Active => "active",
            TokenState::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "active" {
            TokenState::Active
        } else {
            TokenState::Revoked
        }
    }
}

/// Refresh token row. Only the hash of the issued value is stored.
#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub state: TokenState,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Session ledger row for an issued access token.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub ip: Option<String>,
    pub device: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Delivery channel for one-time codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtpChannel {
    Sms,
    Email,
}

impl OtpChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpChannel::Sms => "sms",
            OtpChannel::Email => "email",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "email" {
            OtpChannel::Email
        } else {
            OtpChannel::Sms
        }
    }

    /// How long a code issued on this channel stays verifiable.
    pub fn ttl(&self) -> chrono::Duration {
        match self {
            OtpChannel::Sms => chrono::Duration::minutes(2),
            OtpChannel::Email => chrono::Duration::minutes(5),
        }
    }
}

/// Lifecycle state of a one-time code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeState {
    Active,
    Used,
}

impl CodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeState::Active => "active",
            CodeState::Used => "used",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "active" {
            CodeState::Active
        } else {
            CodeState::Used
        }
    }
}

/// One-time code row. `code_hash` is a bcrypt hash of the 6-digit code.
#[derive(Debug, Clone)]
pub struct OneTimeCodeRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub channel: OtpChannel,
    pub code_hash: String,
    pub state: CodeState,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Password recovery code row.
#[derive(Debug, Clone)]
pub struct RecoveryCodeRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub code_hash: String,
    /// Wrong guesses made against this code.
    pub failed_attempts: u32,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
