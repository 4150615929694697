//! COSE_Key decoding and signature verification for ES256 and RS256.

use ciborium::Value;
use p256::ecdsa::signature::Verifier as _;
use rsa::pkcs1v15;
use rsa::{BigUint, RsaPublicKey};
use sha2::Sha256;

use super::CeremonyError;

/// ECDSA P-256 with SHA-256.
pub const ES256: i64 = -7;
/// RSASSA-PKCS1-v1_5 with SHA-256.
pub const RS256: i64 = -257;

// COSE_Key labels.
const KTY: i64 = 1;
const ALG: i64 = 3;
const EC2_CRV: i64 = -1;
const EC2_X: i64 = -2;
const EC2_Y: i64 = -3;
const RSA_N: i64 = -1;
const RSA_E: i64 = -2;

const KTY_EC2: i64 = 2;
const KTY_RSA: i64 = 3;
const CRV_P256: i64 = 1;

/// DER SubjectPublicKeyInfo header for an uncompressed P-256 key
/// (id-ecPublicKey, prime256v1, 66-byte BIT STRING).
const P256_SPKI_PREFIX: [u8; 26] = [
    0x30, 0x59, 0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x08,
    0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, 0x03, 0x42, 0x00,
];
const P256_POINT_LEN: usize = 65;

/// A credential public key.
#[derive(Debug, Clone)]
pub enum CoseKey {
    Es256(p256::ecdsa::VerifyingKey),
    Rs256(RsaPublicKey),
}

impl CoseKey {
    /// Decode a CBOR-encoded COSE_Key.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, CeremonyError> {
        let value: Value = ciborium::from_reader(bytes)
            .map_err(|_| CeremonyError::Malformed("credential public key".into()))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, CeremonyError> {
        let map = value
            .as_map()
            .ok_or_else(|| CeremonyError::Malformed("credential public key".into()))?;
        let kty = int_label(map, KTY)?;
        let alg = int_label(map, ALG)?;
        match (kty, alg) {
            (KTY_EC2, ES256) => {
                if int_label(map, EC2_CRV)? != CRV_P256 {
                    return Err(CeremonyError::UnsupportedAlgorithm(alg));
                }
                let x = bytes_label(map, EC2_X)?;
                let y = bytes_label(map, EC2_Y)?;
                if x.len() != 32 || y.len() != 32 {
                    return Err(CeremonyError::Malformed("EC2 coordinates".into()));
                }
                let point = p256::EncodedPoint::from_affine_coordinates(
                    p256::FieldBytes::from_slice(x),
                    p256::FieldBytes::from_slice(y),
                    false,
                );
                let key = p256::ecdsa::VerifyingKey::from_encoded_point(&point)
                    .map_err(|_| CeremonyError::Malformed("EC2 public key".into()))?;
                Ok(CoseKey::Es256(key))
            }
            (KTY_RSA, RS256) => {
                let n = BigUint::from_bytes_be(bytes_label(map, RSA_N)?);
                let e = BigUint::from_bytes_be(bytes_label(map, RSA_E)?);
                let key = RsaPublicKey::new(n, e)
                    .map_err(|_| CeremonyError::Malformed("RSA public key".into()))?;
                Ok(CoseKey::Rs256(key))
            }
            _ => Err(CeremonyError::UnsupportedAlgorithm(alg)),
        }
    }

    /// Subject key of a DER attestation certificate. Only P-256 subject keys
    /// are recognised.
    pub fn from_certificate(der: &[u8]) -> Result<Self, CeremonyError> {
        let malformed = || CeremonyError::Malformed("attestation certificate key".into());
        let start = der
            .windows(P256_SPKI_PREFIX.len())
            .position(|w| w == P256_SPKI_PREFIX)
            .ok_or_else(malformed)?
            + P256_SPKI_PREFIX.len();
        let point = der
            .get(start..start + P256_POINT_LEN)
            .ok_or_else(malformed)?;
        let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(point).map_err(|_| malformed())?;
        Ok(CoseKey::Es256(key))
    }

    /// Uncompressed SEC1 point of an ES256 key.
    pub fn sec1_point(&self) -> Option<Vec<u8>> {
        match self {
            CoseKey::Es256(key) => Some(key.to_encoded_point(false).as_bytes().to_vec()),
            CoseKey::Rs256(_) => None,
        }
    }

    /// COSE algorithm identifier.
    pub fn alg(&self) -> i64 {
        match self {
            CoseKey::Es256(_) => ES256,
            CoseKey::Rs256(_) => RS256,
        }
    }

    /// Verify `signature` over `message`. ES256 signatures are DER encoded.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CeremonyError> {
        match self {
            CoseKey::Es256(key) => {
                let sig = p256::ecdsa::Signature::from_der(signature)
                    .map_err(|_| CeremonyError::BadSignature)?;
                key.verify(message, &sig)
                    .map_err(|_| CeremonyError::BadSignature)
            }
            CoseKey::Rs256(key) => {
                let verifier = pkcs1v15::VerifyingKey::<Sha256>::new(key.clone());
                let sig = pkcs1v15::Signature::try_from(signature)
                    .map_err(|_| CeremonyError::BadSignature)?;
                verifier
                    .verify(message, &sig)
                    .map_err(|_| CeremonyError::BadSignature)
            }
        }
    }
}

fn lookup(map: &[(Value, Value)], label: i64) -> Option<&Value> {
    map.iter()
        .find(|(k, _)| k.as_integer().map(i128::from) == Some(i128::from(label)))
        .map(|(_, v)| v)
}

fn int_label(map: &[(Value, Value)], label: i64) -> Result<i64, CeremonyError> {
    lookup(map, label)
        .and_then(Value::as_integer)
        .and_then(|i| i64::try_from(i).ok())
        .ok_or_else(|| CeremonyError::Malformed(format!("COSE label {label}")))
}

fn bytes_label(map: &[(Value, Value)], label: i64) -> Result<&[u8], CeremonyError> {
    lookup(map, label)
        .and_then(Value::as_bytes)
        .map(Vec::as_slice)
        .ok_or_else(|| CeremonyError::Malformed(format!("COSE label {label}")))
}

#[cfg(test)]
mod tests {
    use p256::ecdsa::signature::Signer;
    use p256::ecdsa::{Signature, SigningKey};

    use super::*;
    use crate::webauthn::testkit;

    #[test]
    fn es256_key_verifies_its_signatures() {
        let signer = testkit::signing_key();
        let key = CoseKey::from_cbor(&testkit::cose_key(&signer)).unwrap();
        assert_eq!(key.alg(), ES256);

        let sig: Signature = signer.sign(b"hello");
        assert!(key.verify(b"hello", sig.to_der().as_bytes()).is_ok());
        assert!(matches!(
            key.verify(b"world", sig.to_der().as_bytes()),
            Err(CeremonyError::BadSignature)
        ));
    }

    #[test]
    fn signature_from_another_key_fails() {
        let key = CoseKey::from_cbor(&testkit::cose_key(&testkit::signing_key())).unwrap();
        let other = SigningKey::from_slice(&[9u8; 32]).unwrap();
        let sig: Signature = other.sign(b"hello");
        assert!(key.verify(b"hello", sig.to_der().as_bytes()).is_err());
    }

    fn rsa_cose_key(key: &rsa::RsaPrivateKey) -> Value {
        use rsa::traits::PublicKeyParts;
        Value::Map(vec![
            (Value::Integer(KTY.into()), Value::Integer(KTY_RSA.into())),
            (Value::Integer(ALG.into()), Value::Integer(RS256.into())),
            (Value::Integer(RSA_N.into()), Value::Bytes(key.n().to_bytes_be())),
            (Value::Integer(RSA_E.into()), Value::Bytes(key.e().to_bytes_be())),
        ])
    }

    #[test]
    fn rs256_key_verifies_pkcs1_signatures() {
        use rsa::signature::SignatureEncoding;

        let private = rsa::RsaPrivateKey::new(&mut rsa::rand_core::OsRng, 1024).unwrap();
        let key = CoseKey::from_value(&rsa_cose_key(&private)).unwrap();
        assert_eq!(key.alg(), RS256);
        assert!(key.sec1_point().is_none());

        let signer = pkcs1v15::SigningKey::<Sha256>::new(private);
        let sig = signer.sign(b"hello").to_vec();
        assert!(key.verify(b"hello", &sig).is_ok());
        assert!(matches!(
            key.verify(b"world", &sig),
            Err(CeremonyError::BadSignature)
        ));

        let mut flipped = sig.clone();
        flipped[0] ^= 0x01;
        assert!(matches!(
            key.verify(b"hello", &flipped),
            Err(CeremonyError::BadSignature)
        ));
        assert!(matches!(
            key.verify(b"hello", &sig[..10]),
            Err(CeremonyError::BadSignature)
        ));
    }

    #[test]
    fn certificate_subject_key_is_found() {
        let signer = testkit::signing_key();
        let cert = testkit::certificate(&signer);
        let key = CoseKey::from_certificate(&cert).unwrap();
        let expected = signer.verifying_key().to_encoded_point(false);
        assert_eq!(key.sec1_point().unwrap(), expected.as_bytes());

        assert!(matches!(
            CoseKey::from_certificate(&[0x30, 0x00]),
            Err(CeremonyError::Malformed(_))
        ));
        assert!(matches!(
            CoseKey::from_certificate(&cert[..cert.len() - 1]),
            Err(CeremonyError::Malformed(_))
        ));
    }

    #[test]
    fn unknown_algorithm_is_unsupported() {
        let value = Value::Map(vec![
            (Value::Integer(KTY.into()), Value::Integer(1.into())),
            (Value::Integer(ALG.into()), Value::Integer((-8).into())),
        ]);
        assert!(matches!(
            CoseKey::from_value(&value),
            Err(CeremonyError::UnsupportedAlgorithm(-8))
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            CoseKey::from_cbor(&[0xff, 0x00]),
            Err(CeremonyError::Malformed(_))
        ));
    }
}
