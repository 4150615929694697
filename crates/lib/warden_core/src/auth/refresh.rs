//! Refresh-token rotation, validation and revocation.
//!
//! Only the SHA-256 hash of an issued token is persisted. Issuing a new token
//! revokes every active token of the same principal inside one atomic store
//! call, so at most one refresh token per principal is ever valid.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use super::AuthError;
use super::secrets::{digests_match, generate_token, hash_token};
use crate::models::auth::TokenState;
use crate::store::RefreshTokenStore;

/// Default refresh-token lifetime.
pub const REFRESH_TOKEN_TTL_DAYS: i64 = 7;

#[derive(Clone)]
pub struct RefreshTokenService {
    store: Arc<dyn RefreshTokenStore>,
    ttl: Duration,
}

impl RefreshTokenService {
    pub fn new(store: Arc<dyn RefreshTokenStore>) -> Self {
        Self {
            store,
            ttl: Duration::days(REFRESH_TOKEN_TTL_DAYS),
        }
    }

    /// Override the token lifetime.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Issue a fresh refresh token, superseding any active one.
    pub async fn issue(&self, principal_id: Uuid) -> Result<String, AuthError> {
        let raw = generate_token();
        let expires_at = Utc::now() + self.ttl;
        self.store
            .rotate_refresh_token(principal_id, &hash_token(&raw), expires_at)
            .await?;
        debug!(user_id = %principal_id, "refresh token rotated");
        Ok(raw)
    }

    /// True only when the principal's latest token matches, is active and unexpired.
    pub async fn validate(&self, principal_id: Uuid, raw_token: &str) -> Result<bool, AuthError> {
        let Some(record) = self.store.latest_refresh_token(principal_id).await? else {
            return Ok(false);
        };
        let matches = digests_match(&record.token_hash, &hash_token(raw_token));
        Ok(matches && record.state == TokenState::Active && record.expires_at > Utc::now())
    }

    /// Revoke every active token of the principal. Idempotent.
    pub async fn revoke_all(&self, principal_id: Uuid) -> Result<(), AuthError> {
        let revoked = self.store.revoke_refresh_tokens(principal_id).await?;
        debug!(user_id = %principal_id, revoked, "refresh tokens revoked");
        Ok(())
    }

    /// Delete expired rows. Correctness never depends on this running.
    pub async fn purge_expired(&self) -> Result<u64, AuthError> {
        self.store.purge_expired_refresh_tokens(Utc::now()).await
    }
}
