//! Registration and authentication ceremonies.

use std::sync::Arc;

use chrono::Utc;
use ciborium::Value;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::authdata::AuthenticatorData;
use super::challenge::{CeremonyKind, ChallengeStore};
use super::client_data::{ClientData, decode_b64, normalize_challenge};
use super::cose::CoseKey;
use super::options::{CreationOptions, RequestOptions};
use super::{CeremonyError, RelyingParty};
use crate::models::auth::Principal;
use crate::models::webauthn::{BiometricKind, StoredCredential};
use crate::store::CredentialStore;

/// Browser `PublicKeyCredential` produced by `navigator.credentials.create`.
/// Binary members are base64url (or base64) strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationResponse {
    pub id: String,
    pub raw_id: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub response: AttestationPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationPayload {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    pub attestation_object: String,
}

/// Browser `PublicKeyCredential` produced by `navigator.credentials.get`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResponse {
    pub id: String,
    pub raw_id: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub response: AssertionPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionPayload {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    pub authenticator_data: String,
    pub signature: String,
    #[serde(default)]
    pub user_handle: Option<String>,
}

/// Outcome of a successful registration.
#[derive(Debug, Clone)]
pub struct RegisteredCredential {
    pub credential: StoredCredential,
    /// Whether a credential existed before and was replaced.
    pub replaced: bool,
}

/// Runs WebAuthn ceremonies for one relying party.
#[derive(Clone)]
pub struct CeremonyEngine {
    rp: RelyingParty,
    challenges: Arc<ChallengeStore>,
    credentials: Arc<dyn CredentialStore>,
}

impl CeremonyEngine {
    pub fn new(
        rp: RelyingParty,
        challenges: Arc<ChallengeStore>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            rp,
            challenges,
            credentials,
        }
    }

    pub fn relying_party(&self) -> &RelyingParty {
        &self.rp
    }

    /// Issue a registration challenge for the principal.
    pub fn registration_options(&self, principal: &Principal, kind: BiometricKind) -> CreationOptions {
        let challenge = self
            .challenges
            .issue(principal.id, CeremonyKind::Registration, Some(kind));
        CreationOptions::new(&self.rp, principal, kind, challenge)
    }

    /// Verify an attestation and bind the credential to the principal,
    /// replacing any earlier credential.
    pub async fn verify_registration(
        &self,
        principal_id: Uuid,
        response: &AttestationResponse,
    ) -> Result<RegisteredCredential, CeremonyError> {
        let client_data_raw = decode_b64("clientDataJSON", &response.response.client_data_json)?;
        let client_data = ClientData::parse(&client_data_raw)?;
        let pending = self.take_challenge(&client_data, CeremonyKind::Registration, principal_id)?;

        let credential = self.check_attestation(&pending, response, &client_data, &client_data_raw)?;
        let replaced = self.credentials.find_credential(principal_id).await?.is_some();
        self.credentials.upsert_credential(&credential).await?;
        info!(user_id = %principal_id, kind = credential.kind.as_str(), replaced, "webauthn credential registered");

        Ok(RegisteredCredential {
            credential,
            replaced,
        })
    }

    /// Issue a challenge for an account that does not exist yet. The
    /// principal's id is reserved for the account the attestation creates.
    pub fn enrollment_options(&self, principal: &Principal, kind: BiometricKind) -> CreationOptions {
        let challenge = self
            .challenges
            .issue(principal.id, CeremonyKind::Enrollment, Some(kind));
        CreationOptions::new(&self.rp, principal, kind, challenge)
    }

    /// Verify an enrollment attestation. Nothing is stored: the returned
    /// credential carries the reserved principal id and is persisted with
    /// the new account by the caller.
    pub fn verify_enrollment(
        &self,
        response: &AttestationResponse,
    ) -> Result<StoredCredential, CeremonyError> {
        let client_data_raw = decode_b64("clientDataJSON", &response.response.client_data_json)?;
        let client_data = ClientData::parse(&client_data_raw)?;
        let challenge = normalize_challenge(&client_data.challenge)?;
        let pending = self
            .challenges
            .take(&challenge, CeremonyKind::Enrollment)
            .ok_or(CeremonyError::UnknownChallenge)?;
        self.check_attestation(&pending, response, &client_data, &client_data_raw)
    }

    /// Issue an authentication challenge restricted to the stored credential.
    pub async fn authentication_options(
        &self,
        principal_id: Uuid,
    ) -> Result<RequestOptions, CeremonyError> {
        let stored = self
            .credentials
            .find_credential(principal_id)
            .await?
            .ok_or(CeremonyError::NoCredential)?;
        let challenge = self
            .challenges
            .issue(principal_id, CeremonyKind::Authentication, None);
        Ok(RequestOptions::new(
            &self.rp,
            &stored.credential_id,
            stored.kind,
            challenge,
        ))
    }

    /// Verify an assertion and advance the stored counter. Returns the new
    /// counter. Nothing is written when verification fails.
    pub async fn verify_authentication(
        &self,
        principal_id: Uuid,
        response: &AssertionResponse,
    ) -> Result<u32, CeremonyError> {
        let stored = self
            .credentials
            .find_credential(principal_id)
            .await?
            .ok_or(CeremonyError::NoCredential)?;

        let client_data_raw = decode_b64("clientDataJSON", &response.response.client_data_json)?;
        let client_data = ClientData::parse(&client_data_raw)?;
        self.take_challenge(&client_data, CeremonyKind::Authentication, principal_id)?;
        client_data.check("webauthn.get", &self.rp.origin)?;

        let raw_id = decode_b64("rawId", &response.raw_id)?;
        if raw_id != stored.credential_id {
            return Err(CeremonyError::CredentialIdMismatch);
        }

        let auth_data_raw = decode_b64("authenticatorData", &response.response.authenticator_data)?;
        let auth_data = AuthenticatorData::parse(&auth_data_raw)?;
        auth_data.check(&self.rp.id_hash())?;

        let signature = decode_b64("signature", &response.response.signature)?;
        let key = CoseKey::from_cbor(&stored.public_key)?;
        let mut signed = auth_data_raw;
        signed.extend_from_slice(&Sha256::digest(&client_data_raw));
        key.verify(&signed, &signature)?;

        let presented = auth_data.counter;
        if presented <= stored.prev_counter {
            warn!(user_id = %principal_id, stored = stored.prev_counter, presented, "signature counter did not increase");
            return Err(CeremonyError::CounterNotIncreased {
                stored: stored.prev_counter,
                presented,
            });
        }
        // A concurrent assertion may have advanced the counter since the read.
        if !self
            .credentials
            .advance_counter(principal_id, &stored.credential_id, presented)
            .await?
        {
            warn!(user_id = %principal_id, presented, "lost counter race; rejecting assertion");
            return Err(CeremonyError::CounterNotIncreased {
                stored: stored.prev_counter,
                presented,
            });
        }
        debug!(user_id = %principal_id, counter = presented, "assertion accepted");
        Ok(presented)
    }

    /// Check an attestation against its pending challenge and return the
    /// credential it binds to the challenge's principal.
    fn check_attestation(
        &self,
        pending: &super::PendingChallenge,
        response: &AttestationResponse,
        client_data: &ClientData,
        client_data_raw: &[u8],
    ) -> Result<StoredCredential, CeremonyError> {
        let principal_id = pending.principal_id;
        client_data.check("webauthn.create", &self.rp.origin)?;

        let attestation = decode_b64("attestationObject", &response.response.attestation_object)?;
        let (fmt, att_stmt, auth_data_raw) = split_attestation_object(&attestation)?;

        let auth_data = AuthenticatorData::parse(&auth_data_raw)?;
        auth_data.check(&self.rp.id_hash())?;
        let attested = auth_data
            .attested
            .as_ref()
            .ok_or(CeremonyError::MissingCredentialData)?;

        let raw_id = decode_b64("rawId", &response.raw_id)?;
        if attested.credential_id != raw_id {
            return Err(CeremonyError::CredentialIdMismatch);
        }
        let key = CoseKey::from_cbor(&attested.public_key)?;

        let client_data_hash = Sha256::digest(client_data_raw);
        let extracted_manually = verify_statement(
            &fmt,
            &att_stmt,
            &key,
            &auth_data_raw,
            &auth_data,
            &client_data_hash,
        )?;
        if extracted_manually {
            warn!(user_id = %principal_id, format = %fmt, "attestation chain not verified; using authenticator data");
        }

        let kind = pending.biometric.ok_or(CeremonyError::UnknownChallenge)?;
        Ok(StoredCredential {
            user_id: principal_id,
            credential_id: attested.credential_id.clone(),
            public_key: attested.public_key.clone(),
            prev_counter: auth_data.counter,
            kind,
            extracted_manually,
            registered_at: Utc::now(),
        })
    }

    fn take_challenge(
        &self,
        client_data: &ClientData,
        ceremony: CeremonyKind,
        principal_id: Uuid,
    ) -> Result<super::PendingChallenge, CeremonyError> {
        let challenge = normalize_challenge(&client_data.challenge)?;
        let pending = self
            .challenges
            .take(&challenge, ceremony)
            .ok_or(CeremonyError::UnknownChallenge)?;
        if pending.principal_id != principal_id {
            return Err(CeremonyError::ChallengeMismatch);
        }
        Ok(pending)
    }
}

/// Split an attestation object into `(fmt, attStmt, authData)`.
fn split_attestation_object(raw: &[u8]) -> Result<(String, Value, Vec<u8>), CeremonyError> {
    let malformed = || CeremonyError::Malformed("attestation object".into());
    let value: Value = ciborium::from_reader(raw).map_err(|_| malformed())?;
    let map = value.as_map().ok_or_else(malformed)?;
    let fmt = text_field(map, "fmt")
        .and_then(Value::as_text)
        .ok_or_else(malformed)?
        .to_string();
    let att_stmt = text_field(map, "attStmt").cloned().ok_or_else(malformed)?;
    let auth_data = text_field(map, "authData")
        .and_then(Value::as_bytes)
        .ok_or_else(malformed)?
        .clone();
    Ok((fmt, att_stmt, auth_data))
}

fn text_field<'a>(map: &'a [(Value, Value)], name: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| k.as_text() == Some(name))
        .map(|(_, v)| v)
}

/// Formats whose certificate chains are not checked here. The credential key
/// is taken from the RP-checked authenticator data instead.
const UNVERIFIED_FORMATS: [&str; 4] = ["tpm", "android-key", "android-safetynet", "apple"];

/// Verify the attestation statement. Returns `true` when the format is one of
/// [`UNVERIFIED_FORMATS`] and the key was taken from the authenticator data.
///
/// `none`, `packed` (self or certificate attested) and `fido-u2f` are
/// verified. Any other format is rejected.
fn verify_statement(
    fmt: &str,
    att_stmt: &Value,
    key: &CoseKey,
    auth_data_raw: &[u8],
    auth_data: &AuthenticatorData,
    client_data_hash: &[u8],
) -> Result<bool, CeremonyError> {
    let malformed = || CeremonyError::Malformed("attestation statement".into());
    let stmt = att_stmt.as_map().ok_or_else(malformed)?;
    match fmt {
        "none" => {
            if stmt.is_empty() {
                Ok(false)
            } else {
                Err(malformed())
            }
        }
        "packed" => {
            let alg = text_field(stmt, "alg")
                .and_then(Value::as_integer)
                .and_then(|i| i64::try_from(i).ok())
                .ok_or_else(malformed)?;
            let sig = text_field(stmt, "sig")
                .and_then(Value::as_bytes)
                .ok_or_else(malformed)?;
            let signer = match text_field(stmt, "x5c") {
                Some(x5c) => CoseKey::from_certificate(leaf_certificate(x5c)?)?,
                None => key.clone(),
            };
            if alg != signer.alg() {
                return Err(CeremonyError::UnsupportedAlgorithm(alg));
            }
            let mut signed = auth_data_raw.to_vec();
            signed.extend_from_slice(client_data_hash);
            signer.verify(&signed, sig)?;
            Ok(false)
        }
        "fido-u2f" => {
            let sig = text_field(stmt, "sig")
                .and_then(Value::as_bytes)
                .ok_or_else(malformed)?;
            let x5c = text_field(stmt, "x5c").ok_or_else(malformed)?;
            let signer = CoseKey::from_certificate(leaf_certificate(x5c)?)?;
            let point = key
                .sec1_point()
                .ok_or(CeremonyError::UnsupportedAlgorithm(key.alg()))?;
            let attested = auth_data
                .attested
                .as_ref()
                .ok_or(CeremonyError::MissingCredentialData)?;
            let mut signed = vec![0x00];
            signed.extend_from_slice(&auth_data.rp_id_hash);
            signed.extend_from_slice(client_data_hash);
            signed.extend_from_slice(&attested.credential_id);
            signed.extend_from_slice(&point);
            signer.verify(&signed, sig)?;
            Ok(false)
        }
        other if UNVERIFIED_FORMATS.contains(&other) => {
            if stmt.is_empty() {
                Err(malformed())
            } else {
                Ok(true)
            }
        }
        other => Err(CeremonyError::UnsupportedFormat(other.to_string())),
    }
}

fn leaf_certificate(x5c: &Value) -> Result<&[u8], CeremonyError> {
    x5c.as_array()
        .and_then(|chain| chain.first())
        .and_then(Value::as_bytes)
        .map(Vec::as_slice)
        .ok_or_else(|| CeremonyError::Malformed("x5c".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::auth::Role;
    use crate::store::MemoryStore;
    use crate::webauthn::testkit::{self, Authenticator};

    fn rp() -> RelyingParty {
        RelyingParty::new("example.com", "Example", "https://example.com")
    }

    fn engine(store: Arc<MemoryStore>) -> CeremonyEngine {
        CeremonyEngine::new(rp(), Arc::new(ChallengeStore::new()), store)
    }

    fn principal() -> Principal {
        Principal {
            id: Uuid::new_v4(),
            name: "Ana".into(),
            email: "ana@example.com".into(),
            phone: None,
            role: Role::Visitor,
            enrollment_id: None,
            program: None,
            semester: None,
        }
    }

    async fn registered(engine: &CeremonyEngine, p: &Principal, auth: &Authenticator) {
        let options = engine.registration_options(p, BiometricKind::Fingerprint);
        engine
            .verify_registration(p.id, &auth.attest(&options.challenge))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn registration_then_login() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        let p = principal();
        let auth = Authenticator::new(rp());

        let options = engine.registration_options(&p, BiometricKind::Fingerprint);
        assert_eq!(options.authenticator_selection.authenticator_attachment, "platform");
        let reg = engine
            .verify_registration(p.id, &auth.attest(&options.challenge))
            .await
            .unwrap();
        assert!(!reg.replaced);
        assert!(!reg.credential.extracted_manually);

        let req = engine.authentication_options(p.id).await.unwrap();
        assert_eq!(req.allow_credentials.len(), 1);
        let counter = engine
            .verify_authentication(p.id, &auth.assert(&req.challenge, 1))
            .await
            .unwrap();
        assert_eq!(counter, 1);
        assert_eq!(store.find_credential(p.id).await.unwrap().unwrap().prev_counter, 1);
    }

    #[tokio::test]
    async fn replayed_counter_is_rejected_even_with_valid_signature() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        let p = principal();
        let auth = Authenticator::new(rp());
        registered(&engine, &p, &auth).await;

        let req = engine.authentication_options(p.id).await.unwrap();
        engine
            .verify_authentication(p.id, &auth.assert(&req.challenge, 5))
            .await
            .unwrap();

        for counter in [5, 4] {
            let req = engine.authentication_options(p.id).await.unwrap();
            let err = engine
                .verify_authentication(p.id, &auth.assert(&req.challenge, counter))
                .await
                .unwrap_err();
            assert!(matches!(err, CeremonyError::CounterNotIncreased { stored: 5, .. }));
        }
        assert_eq!(store.find_credential(p.id).await.unwrap().unwrap().prev_counter, 5);
    }

    #[tokio::test]
    async fn zero_counter_authenticator_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store);
        let p = principal();
        let auth = Authenticator::new(rp());
        registered(&engine, &p, &auth).await;

        let req = engine.authentication_options(p.id).await.unwrap();
        assert!(matches!(
            engine
                .verify_authentication(p.id, &auth.assert(&req.challenge, 0))
                .await,
            Err(CeremonyError::CounterNotIncreased { .. })
        ));
    }

    #[tokio::test]
    async fn challenge_cannot_be_reused() {
        let engine = engine(Arc::new(MemoryStore::new()));
        let p = principal();
        let auth = Authenticator::new(rp());
        registered(&engine, &p, &auth).await;

        let req = engine.authentication_options(p.id).await.unwrap();
        engine
            .verify_authentication(p.id, &auth.assert(&req.challenge, 1))
            .await
            .unwrap();
        assert!(matches!(
            engine
                .verify_authentication(p.id, &auth.assert(&req.challenge, 2))
                .await,
            Err(CeremonyError::UnknownChallenge)
        ));
    }

    #[tokio::test]
    async fn challenge_for_other_principal_is_rejected() {
        let engine = engine(Arc::new(MemoryStore::new()));
        let p = principal();
        let q = principal();
        let auth = Authenticator::new(rp());
        let options = engine.registration_options(&p, BiometricKind::Face);
        assert!(matches!(
            engine
                .verify_registration(q.id, &auth.attest(&options.challenge))
                .await,
            Err(CeremonyError::ChallengeMismatch)
        ));
    }

    #[tokio::test]
    async fn wrong_origin_is_rejected_without_storing() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        let p = principal();
        let evil = Authenticator::new(RelyingParty::new(
            "example.com",
            "Example",
            "https://evil.example.net",
        ));
        let options = engine.registration_options(&p, BiometricKind::Fingerprint);
        assert!(matches!(
            engine
                .verify_registration(p.id, &evil.attest(&options.challenge))
                .await,
            Err(CeremonyError::OriginMismatch(_))
        ));
        assert!(store.find_credential(p.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn wrong_rp_id_is_rejected() {
        let engine = engine(Arc::new(MemoryStore::new()));
        let p = principal();
        let other_rp = Authenticator::new(RelyingParty::new(
            "other.com",
            "Other",
            "https://example.com",
        ));
        let options = engine.registration_options(&p, BiometricKind::Fingerprint);
        assert!(matches!(
            engine
                .verify_registration(p.id, &other_rp.attest(&options.challenge))
                .await,
            Err(CeremonyError::RpIdMismatch)
        ));
    }

    #[tokio::test]
    async fn tampered_assertion_signature_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        let p = principal();
        let auth = Authenticator::new(rp());
        registered(&engine, &p, &auth).await;

        let req = engine.authentication_options(p.id).await.unwrap();
        let mut assertion = auth.assert(&req.challenge, 9);
        assertion.response.signature = testkit::b64(&[0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x01]);
        assert!(matches!(
            engine.verify_authentication(p.id, &assertion).await,
            Err(CeremonyError::BadSignature)
        ));
        assert_eq!(store.find_credential(p.id).await.unwrap().unwrap().prev_counter, 0);
    }

    #[tokio::test]
    async fn packed_self_attestation_is_verified() {
        let engine = engine(Arc::new(MemoryStore::new()));
        let p = principal();
        let auth = Authenticator::new(rp());
        let options = engine.registration_options(&p, BiometricKind::SecurityKey);
        let reg = engine
            .verify_registration(p.id, &auth.attest_packed(&options.challenge, true))
            .await
            .unwrap();
        assert!(!reg.credential.extracted_manually);
        assert_eq!(reg.credential.kind, BiometricKind::SecurityKey);
    }

    #[tokio::test]
    async fn bad_packed_signature_never_falls_back() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        let p = principal();
        let auth = Authenticator::new(rp());
        let options = engine.registration_options(&p, BiometricKind::SecurityKey);
        assert!(matches!(
            engine
                .verify_registration(p.id, &auth.attest_packed(&options.challenge, false))
                .await,
            Err(CeremonyError::BadSignature)
        ));
        assert!(store.find_credential(p.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn certificate_attested_packed_is_verified() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        let p = principal();
        let auth = Authenticator::new(rp());

        let options = engine.registration_options(&p, BiometricKind::SecurityKey);
        assert!(matches!(
            engine
                .verify_registration(p.id, &auth.attest_packed_x5c(&options.challenge, false))
                .await,
            Err(CeremonyError::BadSignature)
        ));
        assert!(store.find_credential(p.id).await.unwrap().is_none());

        let options = engine.registration_options(&p, BiometricKind::SecurityKey);
        let reg = engine
            .verify_registration(p.id, &auth.attest_packed_x5c(&options.challenge, true))
            .await
            .unwrap();
        assert!(!reg.credential.extracted_manually);
    }

    #[tokio::test]
    async fn fido_u2f_signature_is_verified() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        let p = principal();
        let auth = Authenticator::new(rp());

        let options = engine.registration_options(&p, BiometricKind::SecurityKey);
        assert!(matches!(
            engine
                .verify_registration(p.id, &auth.attest_u2f(&options.challenge, false))
                .await,
            Err(CeremonyError::BadSignature)
        ));
        assert!(store.find_credential(p.id).await.unwrap().is_none());

        let options = engine.registration_options(&p, BiometricKind::SecurityKey);
        let reg = engine
            .verify_registration(p.id, &auth.attest_u2f(&options.challenge, true))
            .await
            .unwrap();
        assert!(!reg.credential.extracted_manually);
    }

    #[tokio::test]
    async fn statements_without_signature_are_rejected() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        let p = principal();
        let auth = Authenticator::new(rp());

        for fmt in ["packed", "fido-u2f"] {
            let options = engine.registration_options(&p, BiometricKind::Fingerprint);
            let result = engine
                .verify_registration(p.id, &auth.attest_with_format(&options.challenge, fmt))
                .await;
            assert!(matches!(result, Err(CeremonyError::Malformed(_))), "{fmt}");
        }
        assert!(store.find_credential(p.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_format_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        let p = principal();
        let auth = Authenticator::new(rp());
        let options = engine.registration_options(&p, BiometricKind::Fingerprint);
        let result = engine
            .verify_registration(
                p.id,
                &auth.attest_with_format(&options.challenge, "made-up-format"),
            )
            .await;
        assert!(matches!(
            result,
            Err(CeremonyError::UnsupportedFormat(ref f)) if f == "made-up-format"
        ));
        assert!(store.find_credential(p.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn chain_formats_use_authenticator_data_key() {
        let engine = engine(Arc::new(MemoryStore::new()));
        let p = principal();
        let auth = Authenticator::new(rp());
        let options = engine.registration_options(&p, BiometricKind::Fingerprint);
        let reg = engine
            .verify_registration(p.id, &auth.attest_with_format(&options.challenge, "tpm"))
            .await
            .unwrap();
        assert!(reg.credential.extracted_manually);

        // The extracted key is usable for login.
        let req = engine.authentication_options(p.id).await.unwrap();
        assert!(
            engine
                .verify_authentication(p.id, &auth.assert(&req.challenge, 1))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn enrollment_returns_credential_without_storing() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        let p = principal();
        let auth = Authenticator::new(rp());

        let options = engine.enrollment_options(&p, BiometricKind::Face);
        let credential = engine
            .verify_enrollment(&auth.attest(&options.challenge))
            .unwrap();
        assert_eq!(credential.user_id, p.id);
        assert_eq!(credential.kind, BiometricKind::Face);
        assert_eq!(credential.credential_id, auth.credential_id());
        assert!(store.find_credential(p.id).await.unwrap().is_none());

        assert!(matches!(
            engine.verify_enrollment(&auth.attest(&options.challenge)),
            Err(CeremonyError::UnknownChallenge)
        ));
    }

    #[tokio::test]
    async fn enrollment_and_registration_challenges_do_not_mix() {
        let engine = engine(Arc::new(MemoryStore::new()));
        let p = principal();
        let auth = Authenticator::new(rp());

        let options = engine.registration_options(&p, BiometricKind::Fingerprint);
        assert!(matches!(
            engine.verify_enrollment(&auth.attest(&options.challenge)),
            Err(CeremonyError::UnknownChallenge)
        ));

        let options = engine.enrollment_options(&p, BiometricKind::Fingerprint);
        assert!(matches!(
            engine
                .verify_registration(p.id, &auth.attest(&options.challenge))
                .await,
            Err(CeremonyError::UnknownChallenge)
        ));
    }

    #[tokio::test]
    async fn second_registration_overwrites_first() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        let p = principal();
        let first = Authenticator::new(rp());
        let second = Authenticator::with_seed(rp(), 11, b"second-credential");
        registered(&engine, &p, &first).await;

        let options = engine.registration_options(&p, BiometricKind::Face);
        let reg = engine
            .verify_registration(p.id, &second.attest(&options.challenge))
            .await
            .unwrap();
        assert!(reg.replaced);
        let stored = store.find_credential(p.id).await.unwrap().unwrap();
        assert_eq!(stored.credential_id, b"second-credential");
        assert_eq!(stored.kind, BiometricKind::Face);
    }

    #[tokio::test]
    async fn login_without_credential_is_rejected() {
        let engine = engine(Arc::new(MemoryStore::new()));
        assert!(matches!(
            engine.authentication_options(Uuid::new_v4()).await,
            Err(CeremonyError::NoCredential)
        ));
    }
}
