//! Session ledger: one row per issued access token.
//!
//! Opening a session is best effort. A failed write is retried a few times
//! and then logged; it never fails the sign-in that triggered it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::AuthError;
use super::secrets::{digests_match, hash_token};
use crate::models::auth::SessionRecord;
use crate::store::SessionStore;
use crate::uuid::uuidv7;

const OPEN_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

/// Origin metadata recorded alongside a session or audit event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub device: Option<String>,
}

#[derive(Clone)]
pub struct SessionLedger {
    store: Arc<dyn SessionStore>,
}

impl SessionLedger {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Record an issued access token. Returns whether the row was written.
    pub async fn open(&self, principal_id: Uuid, access_token: &str, client: &ClientInfo) -> bool {
        let record = SessionRecord {
            id: uuidv7(),
            user_id: principal_id,
            token_hash: hash_token(access_token),
            ip: client.ip.clone(),
            device: client.device.clone(),
            opened_at: Utc::now(),
            closed_at: None,
        };
        for attempt in 1..=OPEN_ATTEMPTS {
            match self.store.insert_session(&record).await {
                Ok(()) => {
                    debug!(user_id = %principal_id, "session opened");
                    return true;
                }
                Err(e) if attempt < OPEN_ATTEMPTS => {
                    debug!(user_id = %principal_id, attempt, error = %e, "session write failed, retrying");
                    tokio::time::sleep(RETRY_BASE_DELAY * attempt).await;
                }
                Err(e) => {
                    warn!(user_id = %principal_id, error = %e, "session write failed");
                }
            }
        }
        false
    }

    /// True only if the principal's most recent session is open and matches the token.
    pub async fn validate(&self, principal_id: Uuid, access_token: &str) -> Result<bool, AuthError> {
        let Some(session) = self.store.latest_session(principal_id).await? else {
            return Ok(false);
        };
        Ok(session.closed_at.is_none()
            && digests_match(&session.token_hash, &hash_token(access_token)))
    }

    /// Close every open session of the principal. Idempotent.
    pub async fn close_all(&self, principal_id: Uuid) -> Result<(), AuthError> {
        let closed = self.store.close_sessions(principal_id, Utc::now()).await?;
        debug!(user_id = %principal_id, closed, "sessions closed");
        Ok(())
    }
}
