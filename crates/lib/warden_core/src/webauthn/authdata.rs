//! Authenticator data parsing.
//!
//! Layout: `rpIdHash (32) | flags (1) | signCount (4, big endian)`, then for
//! registrations `aaguid (16) | credIdLen (2) | credId | COSE_Key`, then
//! optional CBOR extensions.

use super::CeremonyError;

pub const FLAG_USER_PRESENT: u8 = 0x01;
pub const FLAG_USER_VERIFIED: u8 = 0x04;
pub const FLAG_ATTESTED_DATA: u8 = 0x40;
pub const FLAG_EXTENSIONS: u8 = 0x80;

const HEADER_LEN: usize = 37;
const COUNTER_OFFSET: usize = 33;
const AAGUID_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedCredential {
    pub aaguid: [u8; 16],
    pub credential_id: Vec<u8>,
    /// CBOR-encoded COSE_Key, exactly as embedded.
    pub public_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; 32],
    pub flags: u8,
    pub counter: u32,
    pub attested: Option<AttestedCredential>,
}

impl AuthenticatorData {
    pub fn parse(data: &[u8]) -> Result<Self, CeremonyError> {
        if data.len() < HEADER_LEN {
            return Err(malformed());
        }
        let mut rp_id_hash = [0u8; 32];
        rp_id_hash.copy_from_slice(&data[..32]);
        let flags = data[32];
        let counter = u32::from_be_bytes([
            data[COUNTER_OFFSET],
            data[COUNTER_OFFSET + 1],
            data[COUNTER_OFFSET + 2],
            data[COUNTER_OFFSET + 3],
        ]);

        let attested = if flags & FLAG_ATTESTED_DATA != 0 {
            Some(parse_attested(&data[HEADER_LEN..])?)
        } else {
            None
        };

        Ok(Self {
            rp_id_hash,
            flags,
            counter,
            attested,
        })
    }

    pub fn user_present(&self) -> bool {
        self.flags & FLAG_USER_PRESENT != 0
    }

    pub fn user_verified(&self) -> bool {
        self.flags & FLAG_USER_VERIFIED != 0
    }

    /// Check relying party and the presence/verification flags.
    pub fn check(&self, rp_id_hash: &[u8; 32]) -> Result<(), CeremonyError> {
        if &self.rp_id_hash != rp_id_hash {
            return Err(CeremonyError::RpIdMismatch);
        }
        if !self.user_present() {
            return Err(CeremonyError::UserNotPresent);
        }
        if !self.user_verified() {
            return Err(CeremonyError::UserNotVerified);
        }
        Ok(())
    }
}

fn parse_attested(rest: &[u8]) -> Result<AttestedCredential, CeremonyError> {
    if rest.len() < AAGUID_LEN + 2 {
        return Err(malformed());
    }
    let mut aaguid = [0u8; 16];
    aaguid.copy_from_slice(&rest[..AAGUID_LEN]);
    let id_len = u16::from_be_bytes([rest[AAGUID_LEN], rest[AAGUID_LEN + 1]]) as usize;
    let id_start = AAGUID_LEN + 2;
    let key_start = id_start + id_len;
    if rest.len() <= key_start {
        return Err(malformed());
    }
    let credential_id = rest[id_start..key_start].to_vec();

    // The COSE key has no length prefix; decode one CBOR item to find its end.
    let mut cursor = &rest[key_start..];
    let before = cursor.len();
    let _: ciborium::Value = ciborium::from_reader(&mut cursor).map_err(|_| malformed())?;
    let consumed = before - cursor.len();

    Ok(AttestedCredential {
        aaguid,
        credential_id,
        public_key: rest[key_start..key_start + consumed].to_vec(),
    })
}

fn malformed() -> CeremonyError {
    CeremonyError::Malformed("authenticator data".into())
}
