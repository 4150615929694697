//! Storage seams for authentication state.
//!
//! All authentication state lives in the store; components hold no mutable
//! state of their own. `PgStore` is the production implementation and
//! `MemoryStore` offers the same atomicity guarantees in-process.
//!
//! Methods that must be atomic say so; implementations serialize them per
//! principal (PostgreSQL row locks, or the memory store's single mutex).

pub mod memory;
pub mod pg;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::auth::AuthError;
use crate::models::audit::AuditEvent;
use crate::models::auth::{
    AccountStatus, NewUser, OneTimeCodeRecord, RecoveryCodeRecord, RefreshTokenRecord, SessionRecord, UserRecord,
};
use crate::models::profile::ProfileChanges;
use crate::models::webauthn::StoredCredential;

pub use memory::MemoryStore;
pub use pg::PgStore;

/// User accounts.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, AuthError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, AuthError>;

    async fn find_user_by_phone(&self, phone: &str) -> Result<Option<UserRecord>, AuthError>;

    async fn find_user_by_enrollment_id(
        &self,
        enrollment_id: &str,
    ) -> Result<Option<UserRecord>, AuthError>;

    /// Insert a user. Duplicate email or phone yields [`AuthError::Conflict`].
    async fn create_user(&self, user: NewUser) -> Result<UserRecord, AuthError>;

    /// Insert a user with id `credential.user_id` together with its WebAuthn
    /// credential, atomically. Duplicate email or phone yields
    /// [`AuthError::Conflict`] and stores nothing.
    async fn create_user_with_credential(
        &self,
        user: NewUser,
        credential: &StoredCredential,
    ) -> Result<UserRecord, AuthError>;

    async fn set_account_status(&self, id: Uuid, status: AccountStatus) -> Result<(), AuthError>;

    /// Set the federation provider tag unless one is already recorded.
    async fn link_oauth_provider(&self, id: Uuid, provider: &str) -> Result<(), AuthError>;

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> Result<(), AuthError>;

    /// Apply profile changes. Duplicate email or phone yields [`AuthError::Conflict`].
    async fn update_profile(&self, id: Uuid, changes: &ProfileChanges) -> Result<(), AuthError>;
}

/// Refresh-token rows.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Atomically revoke every active row of the user and insert a new active row.
    async fn rotate_refresh_token(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AuthError>;

    /// Most recently issued row for the user, whatever its state.
    async fn latest_refresh_token(
        &self,
        user_id: Uuid,
    ) -> Result<Option<RefreshTokenRecord>, AuthError>;

    /// Revoke every active row of the user. Returns the number of rows changed.
    async fn revoke_refresh_tokens(&self, user_id: Uuid) -> Result<u64, AuthError>;

    /// Delete rows whose expiry has passed.
    async fn purge_expired_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64, AuthError>;
}

/// Session ledger rows.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: &SessionRecord) -> Result<(), AuthError>;

    /// Most recently opened session for the user.
    async fn latest_session(&self, user_id: Uuid) -> Result<Option<SessionRecord>, AuthError>;

    /// Close every open session of the user. Returns the number of rows changed.
    async fn close_sessions(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<u64, AuthError>;
}

/// One-time code rows.
#[async_trait]
pub trait OneTimeCodeStore: Send + Sync {
    async fn insert_code(&self, code: &OneTimeCodeRecord) -> Result<(), AuthError>;

    /// Atomically mark the user's latest active code as used and return it as
    /// it was before the update. Concurrent callers never receive the same row.
    async fn consume_latest_code(
        &self,
        user_id: Uuid,
    ) -> Result<Option<OneTimeCodeRecord>, AuthError>;

    /// Delete rows whose expiry has passed.
    async fn purge_expired_codes(&self, now: DateTime<Utc>) -> Result<u64, AuthError>;
}

/// WebAuthn credentials (one per user).
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_credential(&self, user_id: Uuid) -> Result<Option<StoredCredential>, AuthError>;

    /// Insert or replace the user's credential.
    async fn upsert_credential(&self, credential: &StoredCredential) -> Result<(), AuthError>;

    /// Compare-and-set the signature counter: succeeds only when the stored
    /// counter for this credential is strictly lower than `new_counter`.
    async fn advance_counter(
        &self,
        user_id: Uuid,
        credential_id: &[u8],
        new_counter: u32,
    ) -> Result<bool, AuthError>;
}

/// Password recovery codes.
#[async_trait]
pub trait RecoveryStore: Send + Sync {
    /// Atomically drop the user's previous codes and insert this one.
    async fn replace_recovery_code(&self, code: &RecoveryCodeRecord) -> Result<(), AuthError>;

    /// The user's code if it has not expired.
    async fn current_recovery_code(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<RecoveryCodeRecord>, AuthError>;

    /// Count a wrong guess against the code. Returns the new failure count,
    /// or `None` when the row no longer exists.
    async fn record_recovery_failure(&self, id: Uuid) -> Result<Option<u32>, AuthError>;

    /// Delete the code row. Returns whether this caller removed it, so
    /// concurrent redeemers of one code see `true` at most once.
    async fn take_recovery_code(&self, id: Uuid) -> Result<bool, AuthError>;

    async fn delete_recovery_codes(&self, user_id: Uuid) -> Result<(), AuthError>;

    /// Delete rows whose expiry has passed.
    async fn purge_expired_recovery_codes(&self, now: DateTime<Utc>) -> Result<u64, AuthError>;
}

/// Append-only audit log.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append_audit_event(&self, event: &AuditEvent) -> Result<(), AuthError>;
}

/// Everything the authentication subsystem persists.
pub trait AuthStore:
    UserStore
    + RefreshTokenStore
    + SessionStore
    + OneTimeCodeStore
    + CredentialStore
    + RecoveryStore
    + AuditStore
{
}

impl<T> AuthStore for T where
    T: UserStore
        + RefreshTokenStore
        + SessionStore
        + OneTimeCodeStore
        + CredentialStore
        + RecoveryStore
        + AuditStore
{
}
