//! One-time code issuance and single-use verification.
//!
//! Codes are six digits, stored as bcrypt hashes. Only the most recently
//! issued active code of a principal is eligible, and any verification
//! attempt that finds a code consumes it, whether or not it matched.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use super::AuthError;
use super::password::{hash_with_cost, verify_password};
use super::secrets::generate_numeric_code;
use crate::models::auth::{CodeState, OneTimeCodeRecord, OtpChannel};
use crate::store::OneTimeCodeStore;
use crate::uuid::uuidv7;

/// bcrypt cost for one-time codes.
const CODE_HASH_COST: u32 = 10;

/// Result of a verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpOutcome {
    Verified,
    /// No active code exists (never issued, or already consumed).
    NoActiveCode,
    Expired,
    Mismatch,
}

impl OtpOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, OtpOutcome::Verified)
    }
}

#[derive(Clone)]
pub struct OneTimeCodeManager {
    store: Arc<dyn OneTimeCodeStore>,
    hash_cost: u32,
}

impl OneTimeCodeManager {
    pub fn new(store: Arc<dyn OneTimeCodeStore>) -> Self {
        Self {
            store,
            hash_cost: CODE_HASH_COST,
        }
    }

    /// Override the bcrypt cost (tests use the minimum).
    pub fn with_hash_cost(mut self, cost: u32) -> Self {
        self.hash_cost = cost;
        self
    }

    /// Issue a new code and return the plaintext for out-of-band delivery.
    pub async fn issue(&self, principal_id: Uuid, channel: OtpChannel) -> Result<String, AuthError> {
        let code = generate_numeric_code();
        let now = Utc::now();
        let record = OneTimeCodeRecord {
            id: uuidv7(),
            user_id: principal_id,
            channel,
            code_hash: hash_with_cost(&code, self.hash_cost)?,
            state: CodeState::Active,
            issued_at: now,
            expires_at: now + channel.ttl(),
        };
        self.store.insert_code(&record).await?;
        debug!(user_id = %principal_id, channel = channel.as_str(), "one-time code issued");
        Ok(code)
    }

    /// Consume the latest active code and compare it with the submission.
    pub async fn verify(&self, principal_id: Uuid, submitted: &str) -> Result<OtpOutcome, AuthError> {
        let Some(record) = self.store.consume_latest_code(principal_id).await? else {
            return Ok(OtpOutcome::NoActiveCode);
        };
        if record.expires_at <= Utc::now() {
            return Ok(OtpOutcome::Expired);
        }
        if verify_password(submitted.trim(), &record.code_hash)? {
            Ok(OtpOutcome::Verified)
        } else {
            Ok(OtpOutcome::Mismatch)
        }
    }

    /// Delete expired rows. Safe to run on any schedule, including never.
    pub async fn purge_expired(&self) -> Result<u64, AuthError> {
        self.store.purge_expired_codes(Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn manager(store: Arc<MemoryStore>) -> OneTimeCodeManager {
        OneTimeCodeManager::new(store).with_hash_cost(4)
    }

    #[tokio::test]
    async fn correct_code_verifies_once() {
        let otp = manager(Arc::new(MemoryStore::new()));
        let p = Uuid::new_v4();
        let code = otp.issue(p, OtpChannel::Sms).await.unwrap();
        assert_eq!(otp.verify(p, &code).await.unwrap(), OtpOutcome::Verified);
        assert_eq!(otp.verify(p, &code).await.unwrap(), OtpOutcome::NoActiveCode);
    }

    #[tokio::test]
    async fn wrong_code_consumes_the_row() {
        let otp = manager(Arc::new(MemoryStore::new()));
        let p = Uuid::new_v4();
        let code = otp.issue(p, OtpChannel::Sms).await.unwrap();
        let wrong = if code == "000000" { "111111" } else { "000000" };
        assert_eq!(otp.verify(p, wrong).await.unwrap(), OtpOutcome::Mismatch);
        assert_eq!(otp.verify(p, &code).await.unwrap(), OtpOutcome::NoActiveCode);
    }

    #[tokio::test]
    async fn only_latest_code_is_eligible() {
        let otp = manager(Arc::new(MemoryStore::new()));
        let p = Uuid::new_v4();
        let first = otp.issue(p, OtpChannel::Sms).await.unwrap();
        let second = otp.issue(p, OtpChannel::Sms).await.unwrap();
        if first != second {
            assert_eq!(otp.verify(p, &first).await.unwrap(), OtpOutcome::Mismatch);
        }
        // The older row is still active but the newer one was consumed first.
        assert_eq!(otp.verify(p, &first).await.unwrap(), OtpOutcome::Verified);
    }

    #[tokio::test]
    async fn expired_code_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let otp = manager(store.clone());
        let p = Uuid::new_v4();
        let now = Utc::now();
        store
            .insert_code(&OneTimeCodeRecord {
                id: uuidv7(),
                user_id: p,
                channel: OtpChannel::Sms,
                code_hash: hash_with_cost("123456", 4).unwrap(),
                state: CodeState::Active,
                issued_at: now - chrono::Duration::minutes(3),
                expires_at: now - chrono::Duration::minutes(1),
            })
            .await
            .unwrap();
        assert_eq!(otp.verify(p, "123456").await.unwrap(), OtpOutcome::Expired);
        assert_eq!(otp.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_verification_succeeds_at_most_once() {
        let otp = manager(Arc::new(MemoryStore::new()));
        let p = Uuid::new_v4();
        let code = otp.issue(p, OtpChannel::Sms).await.unwrap();
        let (a, b) = tokio::join!(otp.verify(p, &code), otp.verify(p, &code));
        let verified = [a.unwrap(), b.unwrap()]
            .iter()
            .filter(|o| o.is_verified())
            .count();
        assert_eq!(verified, 1);
    }
}
