//! Public-key credential options returned to the browser.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Serialize;

use super::RelyingParty;
use super::cose::{ES256, RS256};
use crate::models::auth::Principal;
use crate::models::webauthn::BiometricKind;

/// Ceremony timeout advertised to the browser, in milliseconds.
pub const TIMEOUT_MS: u32 = 60_000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpEntity {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntity {
    /// base64url of the principal id bytes.
    pub id: String,
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CredentialParameter {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub alg: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorSelection {
    pub authenticator_attachment: &'static str,
    pub resident_key: &'static str,
    pub user_verification: &'static str,
}

/// `PublicKeyCredentialCreationOptions`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreationOptions {
    pub challenge: String,
    pub rp: RpEntity,
    pub user: UserEntity,
    pub pub_key_cred_params: Vec<CredentialParameter>,
    pub timeout: u32,
    pub authenticator_selection: AuthenticatorSelection,
    pub attestation: &'static str,
}

impl CreationOptions {
    pub fn new(rp: &RelyingParty, principal: &Principal, kind: BiometricKind, challenge: String) -> Self {
        Self {
            challenge,
            rp: RpEntity {
                id: rp.id.clone(),
                name: rp.name.clone(),
            },
            user: UserEntity {
                id: URL_SAFE_NO_PAD.encode(principal.id.as_bytes()),
                name: principal.email.clone(),
                display_name: principal.name.clone(),
            },
            pub_key_cred_params: vec![
                CredentialParameter {
                    kind: "public-key",
                    alg: ES256,
                },
                CredentialParameter {
                    kind: "public-key",
                    alg: RS256,
                },
            ],
            timeout: TIMEOUT_MS,
            authenticator_selection: AuthenticatorSelection {
                authenticator_attachment: kind.attachment(),
                resident_key: "preferred",
                user_verification: "required",
            },
            attestation: "none",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AllowedCredential {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: String,
    pub transports: Vec<&'static str>,
}

/// `PublicKeyCredentialRequestOptions`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOptions {
    pub challenge: String,
    pub timeout: u32,
    pub rp_id: String,
    pub allow_credentials: Vec<AllowedCredential>,
    pub user_verification: &'static str,
}

impl RequestOptions {
    pub fn new(rp: &RelyingParty, credential_id: &[u8], kind: BiometricKind, challenge: String) -> Self {
        let transports = match kind {
            BiometricKind::Fingerprint | BiometricKind::Face => vec!["internal"],
            BiometricKind::SecurityKey => vec!["usb", "nfc", "ble"],
        };
        Self {
            challenge,
            timeout: TIMEOUT_MS,
            rp_id: rp.id.clone(),
            allow_credentials: vec![AllowedCredential {
                kind: "public-key",
                id: URL_SAFE_NO_PAD.encode(credential_id),
                transports,
            }],
            user_verification: "required",
        }
    }
}
