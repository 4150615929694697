//! Server-side storage of issued ceremony challenges.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::auth::secrets::generate_challenge;
use crate::models::webauthn::BiometricKind;

/// Lifetime of an issued challenge (5 minutes).
const CHALLENGE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeremonyKind {
    Registration,
    /// Registration that also creates the account.
    Enrollment,
    Authentication,
}

/// What a challenge was issued for.
#[derive(Debug, Clone)]
pub struct PendingChallenge {
    pub principal_id: Uuid,
    pub ceremony: CeremonyKind,
    /// Biometric tag requested at registration.
    pub biometric: Option<BiometricKind>,
    pub created_at: Instant,
}

/// Single-use challenges keyed by their base64url value.
pub struct ChallengeStore {
    pending: DashMap<String, PendingChallenge>,
    ttl: Duration,
}

impl ChallengeStore {
    pub fn new() -> Self {
        Self::with_ttl(CHALLENGE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            ttl,
        }
    }

    /// Generate and remember a challenge for the principal.
    pub fn issue(
        &self,
        principal_id: Uuid,
        ceremony: CeremonyKind,
        biometric: Option<BiometricKind>,
    ) -> String {
        let challenge = generate_challenge();
        self.pending.insert(
            challenge.clone(),
            PendingChallenge {
                principal_id,
                ceremony,
                biometric,
                created_at: Instant::now(),
            },
        );
        challenge
    }

    /// Remove and return a pending challenge of the given ceremony kind.
    ///
    /// A challenge presented for the wrong ceremony is still consumed.
    pub fn take(&self, challenge: &str, ceremony: CeremonyKind) -> Option<PendingChallenge> {
        let (_, pending) = self.pending.remove(challenge)?;
        if pending.created_at.elapsed() > self.ttl || pending.ceremony != ceremony {
            return None;
        }
        Some(pending)
    }

    /// Evict expired entries.
    pub fn cleanup(&self) {
        let ttl = self.ttl;
        self.pending.retain(|_, v| v.created_at.elapsed() <= ttl);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Spawn a periodic cleanup task.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                store.cleanup();
            }
        })
    }
}

impl Default for ChallengeStore {
    fn default() -> Self {
        Self::new()
    }
}
