//! Software authenticator producing genuine ES256 WebAuthn responses.
//!
//! Available to this crate's tests and, through the `testkit` feature, to
//! downstream integration tests.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ciborium::Value;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use sha2::{Digest, Sha256};

use super::RelyingParty;
use super::authdata::{FLAG_ATTESTED_DATA, FLAG_USER_PRESENT, FLAG_USER_VERIFIED};
use super::cose::ES256;
use super::engine::{AssertionPayload, AssertionResponse, AttestationPayload, AttestationResponse};

pub fn b64(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Deterministic P-256 key.
pub fn signing_key() -> SigningKey {
    signing_key_from_seed(7)
}

const ATTESTATION_SEED: u8 = 11;

fn signing_key_from_seed(seed: u8) -> SigningKey {
    SigningKey::from_slice(&[seed.max(1); 32]).expect("non-zero scalar below the group order")
}

/// CBOR COSE_Key for the verifying half of `key`.
pub fn cose_key(key: &SigningKey) -> Vec<u8> {
    let point = key.verifying_key().to_encoded_point(false);
    let coord = |c: Option<&p256::FieldBytes>| c.map(|b| b.to_vec()).unwrap_or_default();
    let value = Value::Map(vec![
        (Value::Integer(1.into()), Value::Integer(2.into())),
        (Value::Integer(3.into()), Value::Integer(ES256.into())),
        (Value::Integer((-1).into()), Value::Integer(1.into())),
        (Value::Integer((-2).into()), Value::Bytes(coord(point.x()))),
        (Value::Integer((-3).into()), Value::Bytes(coord(point.y()))),
    ]);
    to_cbor(&value)
}

/// Minimal DER certificate stand-in: a SEQUENCE holding the P-256
/// SubjectPublicKeyInfo of `key`.
pub fn certificate(key: &SigningKey) -> Vec<u8> {
    let point = key.verifying_key().to_encoded_point(false);
    let mut spki = vec![
        0x30, 0x59, 0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x08,
        0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, 0x03, 0x42, 0x00,
    ];
    spki.extend_from_slice(point.as_bytes());
    let mut out = vec![0x30, spki.len() as u8];
    out.extend_from_slice(&spki);
    out
}

/// Raw authenticator data.
pub fn auth_data(
    rp_id_hash: &[u8; 32],
    flags: u8,
    counter: u32,
    attested: Option<(&[u8], &[u8])>,
) -> Vec<u8> {
    let mut out = rp_id_hash.to_vec();
    out.push(flags);
    out.extend_from_slice(&counter.to_be_bytes());
    if let Some((credential_id, public_key)) = attested {
        out.extend_from_slice(&[0u8; 16]);
        out.extend_from_slice(&(credential_id.len() as u16).to_be_bytes());
        out.extend_from_slice(credential_id);
        out.extend_from_slice(public_key);
    }
    out
}

pub fn client_data(kind: &str, challenge: &str, origin: &str) -> Vec<u8> {
    serde_json::json!({
        "type": kind,
        "challenge": challenge,
        "origin": origin,
        "crossOrigin": false,
    })
    .to_string()
    .into_bytes()
}

fn to_cbor(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).expect("writing to a Vec cannot fail");
    out
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

/// A platform authenticator holding one credential.
pub struct Authenticator {
    rp: RelyingParty,
    key: SigningKey,
    credential_id: Vec<u8>,
}

impl Authenticator {
    pub fn new(rp: RelyingParty) -> Self {
        Self::with_seed(rp, 7, b"credential-1")
    }

    pub fn with_seed(rp: RelyingParty, seed: u8, credential_id: &[u8]) -> Self {
        Self {
            rp,
            key: signing_key_from_seed(seed),
            credential_id: credential_id.to_vec(),
        }
    }

    pub fn credential_id(&self) -> &[u8] {
        &self.credential_id
    }

    fn registration_auth_data(&self) -> Vec<u8> {
        let public_key = cose_key(&self.key);
        auth_data(
            &self.rp.id_hash(),
            FLAG_USER_PRESENT | FLAG_USER_VERIFIED | FLAG_ATTESTED_DATA,
            0,
            Some((self.credential_id.as_slice(), public_key.as_slice())),
        )
    }

    fn attestation(
        &self,
        fmt: &str,
        att_stmt: Value,
        auth_data: Vec<u8>,
        client_data_json: Vec<u8>,
    ) -> AttestationResponse {
        let object = Value::Map(vec![
            (text("fmt"), text(fmt)),
            (text("attStmt"), att_stmt),
            (text("authData"), Value::Bytes(auth_data)),
        ]);
        AttestationResponse {
            id: b64(&self.credential_id),
            raw_id: b64(&self.credential_id),
            kind: Some("public-key".into()),
            response: AttestationPayload {
                client_data_json: b64(&client_data_json),
                attestation_object: b64(&to_cbor(&object)),
            },
        }
    }

    /// `none` attestation for the given challenge.
    pub fn attest(&self, challenge: &str) -> AttestationResponse {
        let cd = client_data("webauthn.create", challenge, &self.rp.origin);
        self.attestation("none", Value::Map(vec![]), self.registration_auth_data(), cd)
    }

    /// Self-attested `packed` statement; `valid` selects a correct or a
    /// corrupted signature.
    pub fn attest_packed(&self, challenge: &str, valid: bool) -> AttestationResponse {
        let cd = client_data("webauthn.create", challenge, &self.rp.origin);
        let auth_data = self.registration_auth_data();
        let mut signed = auth_data.clone();
        signed.extend_from_slice(&Sha256::digest(&cd));
        if !valid {
            signed.push(0);
        }
        let sig: Signature = self.key.sign(&signed);
        let stmt = Value::Map(vec![
            (text("alg"), Value::Integer(ES256.into())),
            (text("sig"), Value::Bytes(sig.to_der().as_bytes().to_vec())),
        ]);
        self.attestation("packed", stmt, auth_data, cd)
    }

    /// `packed` statement signed by an attestation certificate key.
    pub fn attest_packed_x5c(&self, challenge: &str, valid: bool) -> AttestationResponse {
        let cd = client_data("webauthn.create", challenge, &self.rp.origin);
        let auth_data = self.registration_auth_data();
        let mut signed = auth_data.clone();
        signed.extend_from_slice(&Sha256::digest(&cd));
        if !valid {
            signed.push(0);
        }
        let attestation_key = signing_key_from_seed(ATTESTATION_SEED);
        let sig: Signature = attestation_key.sign(&signed);
        let stmt = Value::Map(vec![
            (text("alg"), Value::Integer(ES256.into())),
            (text("sig"), Value::Bytes(sig.to_der().as_bytes().to_vec())),
            (
                text("x5c"),
                Value::Array(vec![Value::Bytes(certificate(&attestation_key))]),
            ),
        ]);
        self.attestation("packed", stmt, auth_data, cd)
    }

    /// `fido-u2f` statement over the U2F registration message.
    pub fn attest_u2f(&self, challenge: &str, valid: bool) -> AttestationResponse {
        let cd = client_data("webauthn.create", challenge, &self.rp.origin);
        let mut signed = vec![0x00];
        signed.extend_from_slice(&self.rp.id_hash());
        signed.extend_from_slice(&Sha256::digest(&cd));
        signed.extend_from_slice(&self.credential_id);
        signed.extend_from_slice(self.key.verifying_key().to_encoded_point(false).as_bytes());
        if !valid {
            signed.push(0);
        }
        let attestation_key = signing_key_from_seed(ATTESTATION_SEED);
        let sig: Signature = attestation_key.sign(&signed);
        let stmt = Value::Map(vec![
            (text("sig"), Value::Bytes(sig.to_der().as_bytes().to_vec())),
            (
                text("x5c"),
                Value::Array(vec![Value::Bytes(certificate(&attestation_key))]),
            ),
        ]);
        self.attestation("fido-u2f", stmt, self.registration_auth_data(), cd)
    }

    /// Statement with a placeholder certificate and no signature, labelled
    /// with `fmt`.
    pub fn attest_with_format(&self, challenge: &str, fmt: &str) -> AttestationResponse {
        let cd = client_data("webauthn.create", challenge, &self.rp.origin);
        let stmt = Value::Map(vec![
            (text("ver"), text("2.0")),
            (text("x5c"), Value::Array(vec![Value::Bytes(vec![0x30, 0x00])])),
        ]);
        self.attestation(fmt, stmt, self.registration_auth_data(), cd)
    }

    /// Signed assertion carrying `counter`.
    pub fn assert(&self, challenge: &str, counter: u32) -> AssertionResponse {
        let cd = client_data("webauthn.get", challenge, &self.rp.origin);
        let data = auth_data(
            &self.rp.id_hash(),
            FLAG_USER_PRESENT | FLAG_USER_VERIFIED,
            counter,
            None,
        );
        let mut signed = data.clone();
        signed.extend_from_slice(&Sha256::digest(&cd));
        let sig: Signature = self.key.sign(&signed);
        AssertionResponse {
            id: b64(&self.credential_id),
            raw_id: b64(&self.credential_id),
            kind: Some("public-key".into()),
            response: AssertionPayload {
                client_data_json: b64(&cd),
                authenticator_data: b64(&data),
                signature: b64(sig.to_der().as_bytes()),
                user_handle: None,
            },
        }
    }
}
