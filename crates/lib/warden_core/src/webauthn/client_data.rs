//! `clientDataJSON` decoding and checks.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use serde::Deserialize;

use super::CeremonyError;

#[derive(Debug, Clone, Deserialize)]
pub struct ClientData {
    #[serde(rename = "type")]
    pub kind: String,
    pub challenge: String,
    pub origin: String,
}

impl ClientData {
    pub fn parse(raw: &[u8]) -> Result<Self, CeremonyError> {
        serde_json::from_slice(raw).map_err(|_| CeremonyError::Malformed("client data".into()))
    }

    /// Require the ceremony type (`webauthn.create` / `webauthn.get`) and the
    /// exact relying-party origin.
    pub fn check(&self, expected_type: &str, origin: &str) -> Result<(), CeremonyError> {
        if self.kind != expected_type {
            return Err(CeremonyError::WrongType(self.kind.clone()));
        }
        if self.origin != origin {
            return Err(CeremonyError::OriginMismatch(self.origin.clone()));
        }
        Ok(())
    }
}

/// Decode a binary field sent by the browser. Accepts base64url (with or
/// without padding) and standard base64.
pub fn decode_b64(field: &str, value: &str) -> Result<Vec<u8>, CeremonyError> {
    let trimmed = value.trim().trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD.decode(value.trim()))
        .map_err(|_| CeremonyError::Malformed(field.to_string()))
}

/// Normalize a challenge echoed by the browser to the form it was issued in.
pub fn normalize_challenge(echoed: &str) -> Result<String, CeremonyError> {
    decode_b64("challenge", echoed).map(|bytes| URL_SAFE_NO_PAD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_both_alphabets() {
        let bytes = vec![0xfb, 0xff, 0x01];
        assert_eq!(decode_b64("x", &URL_SAFE_NO_PAD.encode(&bytes)).unwrap(), bytes);
        assert_eq!(decode_b64("x", &STANDARD.encode(&bytes)).unwrap(), bytes);
        assert!(decode_b64("x", "!!!").is_err());
    }

    #[test]
    fn origin_must_match_exactly() {
        let cd = ClientData::parse(
            br#"{"type":"webauthn.get","challenge":"abc","origin":"https://example.com:8443"}"#,
        )
        .unwrap();
        assert!(matches!(
            cd.check("webauthn.get", "https://example.com"),
            Err(CeremonyError::OriginMismatch(_))
        ));
        assert!(cd.check("webauthn.get", "https://example.com:8443").is_ok());
        assert!(matches!(
            cd.check("webauthn.create", "https://example.com:8443"),
            Err(CeremonyError::WrongType(_))
        ));
    }

    #[test]
    fn padded_challenge_normalizes() {
        let issued = URL_SAFE_NO_PAD.encode([9u8; 32]);
        let padded = STANDARD.encode([9u8; 32]);
        assert_eq!(normalize_challenge(&padded).unwrap(), issued);
    }
}
