//! Stored WebAuthn credential models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Biometric-type tag chosen at registration.
///
/// Decides the authenticator attachment requested in creation options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiometricKind {
    Fingerprint,
    Face,
    SecurityKey,
}

impl BiometricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BiometricKind::Fingerprint => "fingerprint",
            BiometricKind::Face => "face",
            BiometricKind::SecurityKey => "security_key",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fingerprint" => Some(BiometricKind::Fingerprint),
            "face" => Some(BiometricKind::Face),
            "security_key" => Some(BiometricKind::SecurityKey),
            _ => None,
        }
    }

    /// `authenticatorAttachment` value for creation options.
    pub fn attachment(&self) -> &'static str {
        match self {
            BiometricKind::Fingerprint | BiometricKind::Face => "platform",
            BiometricKind::SecurityKey => "cross-platform",
        }
    }
}

/// The single WebAuthn credential bound to a principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCredential {
    pub user_id: Uuid,
    /// Raw credential id bytes as produced by the authenticator.
    pub credential_id: Vec<u8>,
    /// COSE_Key encoded public key.
    pub public_key: Vec<u8>,
    /// Last accepted signature counter.
    pub prev_counter: u32,
    pub kind: BiometricKind,
    /// Whether the key was extracted through the authenticator-data fallback.
    pub extracted_manually: bool,
    pub registered_at: DateTime<Utc>,
}
