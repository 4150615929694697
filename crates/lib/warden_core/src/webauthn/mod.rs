//! WebAuthn ceremonies: challenge issuance, attestation verification on
//! registration, assertion verification with anti-replay counters on login.
//!
//! Verification is done in-crate over CBOR (`ciborium`) with ES256 (`p256`)
//! and RS256 (`rsa`) signatures so that the counter policy and the
//! unsupported-format fallback stay under our control.

pub mod authdata;
pub mod challenge;
pub mod client_data;
pub mod cose;
pub mod engine;
pub mod options;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::auth::AuthError;

pub use challenge::{CeremonyKind, ChallengeStore, PendingChallenge};
pub use engine::{AssertionResponse, AttestationResponse, CeremonyEngine, RegisteredCredential};
pub use options::{CreationOptions, RequestOptions};

/// Relying-party identity the ceremonies are scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelyingParty {
    /// Effective domain, e.g. `example.com`.
    pub id: String,
    pub name: String,
    /// Exact origin expected in client data, e.g. `https://example.com`.
    pub origin: String,
}

impl RelyingParty {
    pub fn new(id: impl Into<String>, name: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            origin: origin.into(),
        }
    }

    /// SHA-256 of the RP id, as embedded in authenticator data.
    pub fn id_hash(&self) -> [u8; 32] {
        Sha256::digest(self.id.as_bytes()).into()
    }
}

/// Why a ceremony was rejected. The display string is the reason returned
/// to the client.
#[derive(Debug, Error)]
pub enum CeremonyError {
    #[error("Challenge is unknown, expired or already used")]
    UnknownChallenge,

    #[error("Challenge was issued for another account")]
    ChallengeMismatch,

    #[error("Unexpected client data type '{0}'")]
    WrongType(String),

    #[error("Origin '{0}' does not match the relying party")]
    OriginMismatch(String),

    #[error("Authenticator data is for another relying party")]
    RpIdMismatch,

    #[error("User presence flag not set")]
    UserNotPresent,

    #[error("User verification flag not set")]
    UserNotVerified,

    #[error("Attested credential data missing")]
    MissingCredentialData,

    #[error("Credential id does not match")]
    CredentialIdMismatch,

    #[error("Signature verification failed")]
    BadSignature,

    #[error("Signature counter {presented} does not exceed stored counter {stored}")]
    CounterNotIncreased { stored: u32, presented: u32 },

    #[error("Unsupported COSE algorithm {0}")]
    UnsupportedAlgorithm(i64),

    #[error("Unsupported attestation format '{0}'")]
    UnsupportedFormat(String),

    #[error("Malformed {0}")]
    Malformed(String),

    #[error("No credential registered for this account")]
    NoCredential,

    #[error(transparent)]
    Store(#[from] AuthError),
}

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
