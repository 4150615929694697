//! Random secret generation and one-way hashing helpers.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::distr::Alphanumeric;
use rand::{Rng, RngCore, rng};
use sha2::{Digest, Sha256};

/// Length of opaque bearer secrets (refresh tokens).
pub const TOKEN_LEN: usize = 64;

/// Generate a random opaque token (64 alphanumeric chars).
pub fn generate_token() -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// SHA-256 hex digest of a token, for storage and lookup.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Uniformly random 6-digit numeric code, zero padded.
pub fn generate_numeric_code() -> String {
    let n: u32 = rng().random_range(0..1_000_000);
    format!("{n:06}")
}

/// 32 random bytes, base64url encoded without padding.
pub fn generate_challenge() -> String {
    let mut bytes = [0u8; 32];
    rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Constant-time comparison of two hex digests.
pub fn digests_match(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
