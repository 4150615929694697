//! Password recovery codes.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use super::AuthError;
use super::secrets::{digests_match, generate_numeric_code, hash_token};
use crate::models::auth::RecoveryCodeRecord;
use crate::store::RecoveryStore;
use crate::uuid::uuidv7;

/// Recovery code lifetime.
pub const RECOVERY_CODE_TTL_MINUTES: i64 = 15;

/// Wrong guesses a code survives. The guess that reaches this count deletes it.
pub const MAX_RECOVERY_ATTEMPTS: u32 = 5;

#[derive(Clone)]
pub struct RecoveryCodes {
    store: Arc<dyn RecoveryStore>,
}

impl RecoveryCodes {
    pub fn new(store: Arc<dyn RecoveryStore>) -> Self {
        Self { store }
    }

    /// Issue a code, replacing any earlier one. Returns the plaintext.
    pub async fn issue(&self, principal_id: Uuid) -> Result<String, AuthError> {
        let code = generate_numeric_code();
        let now = Utc::now();
        let record = RecoveryCodeRecord {
            id: uuidv7(),
            user_id: principal_id,
            code_hash: hash_token(&code),
            failed_attempts: 0,
            issued_at: now,
            expires_at: now + Duration::minutes(RECOVERY_CODE_TTL_MINUTES),
        };
        self.store.replace_recovery_code(&record).await?;
        debug!(user_id = %principal_id, "recovery code issued");
        Ok(code)
    }

    /// Consume the principal's code if `code` matches it.
    ///
    /// A match deletes the code before returning `true`, so a code redeems at
    /// most once. A mismatch counts against the code and deletes it after
    /// [`MAX_RECOVERY_ATTEMPTS`] wrong guesses.
    pub async fn redeem(&self, principal_id: Uuid, code: &str) -> Result<bool, AuthError> {
        let Some(current) = self
            .store
            .current_recovery_code(principal_id, Utc::now())
            .await?
        else {
            return Ok(false);
        };

        if digests_match(&hash_token(code.trim()), &current.code_hash) {
            return self.store.take_recovery_code(current.id).await;
        }

        let failures = self.store.record_recovery_failure(current.id).await?;
        if let Some(failures) = failures
            && failures >= MAX_RECOVERY_ATTEMPTS
        {
            warn!(user_id = %principal_id, failures, "recovery code exhausted");
            self.store.delete_recovery_codes(principal_id).await?;
        }
        Ok(false)
    }

    /// Delete expired codes.
    pub async fn purge_expired(&self) -> Result<u64, AuthError> {
        self.store.purge_expired_recovery_codes(Utc::now()).await
    }
}
