//! Authentication and session lifecycle logic.
//!
//! Each submodule is one component: token signing, refresh-token rotation,
//! the session ledger, one-time codes, password recovery, federated identity
//! linking, password verification and the per-role profile field policy.
//! They share the storage traits in [`crate::store`] and this error type.

pub mod federation;
pub mod field_policy;
pub mod jwt;
pub mod otp;
pub mod password;
pub mod recovery;
pub mod refresh;
pub mod secrets;
pub mod session;

use thiserror::Error;

use crate::models::auth::UserRecord;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    CredentialError,

    #[error("Role does not match the account")]
    RoleMismatch,

    #[error("Account is {0}")]
    AccountDisabled(&'static str),

    #[error("Token error: {0}")]
    TokenError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Database error: {0}")]
    DbError(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Refuse accounts whose status is not active.
pub fn ensure_active(user: &UserRecord) -> Result<(), AuthError> {
    if user.status.is_active() {
        Ok(())
    } else {
        Err(AuthError::AccountDisabled(user.status.as_str()))
    }
}
