//! Access-token signing and verification.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{info, warn};
use uuid::Uuid;

use super::AuthError;
use super::secrets::generate_token;
use crate::models::auth::{AuthMethod, Role, TokenClaims};

/// Signs and verifies HS256 access tokens with a single process-wide secret.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer").finish_non_exhaustive()
    }
}

impl TokenIssuer {
    /// Build an issuer. An empty secret is a configuration error.
    pub fn new(secret: &[u8]) -> Result<Self, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::Internal("signing secret is not configured".into()));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        })
    }

    /// Mint a token for the principal, valid for `ttl` from now.
    pub fn issue(
        &self,
        principal_id: Uuid,
        role: Role,
        method: AuthMethod,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        self.issue_at(principal_id, role, method, ttl, Utc::now())
    }

    /// Mint a token with an explicit issuance instant.
    pub fn issue_at(
        &self,
        principal_id: Uuid,
        role: Role,
        method: AuthMethod,
        ttl: Duration,
        issued_at: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let claims = TokenClaims {
            sub: principal_id.to_string(),
            role,
            method,
            iat: issued_at.timestamp(),
            exp: (issued_at + ttl).timestamp(),
            jti: Uuid::new_v4().simple().to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::TokenError(format!("jwt encode: {e}")))
    }

    /// Verify signature and expiry, returning the claims on success.
    ///
    /// Expiry is checked without leeway: a token is rejected from its `exp`
    /// second onward.
    pub fn verify(&self, token: &str) -> Option<TokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        let claims = decode::<TokenClaims>(token, &self.decoding, &validation)
            .ok()?
            .claims;
        // jsonwebtoken accepts exp == now; tokens are dead at their expiry second.
        if claims.exp <= Utc::now().timestamp() {
            return None;
        }
        Some(claims)
    }
}

/// Resolve the signing secret: env var `JWT_SECRET` → `AUTH_SECRET` → persisted file.
pub fn resolve_jwt_secret() -> String {
    if let Ok(secret) = std::env::var("JWT_SECRET")
        && !secret.is_empty()
    {
        return secret;
    }
    if let Ok(secret) = std::env::var("AUTH_SECRET")
        && !secret.is_empty()
    {
        return secret;
    }
    let secret_path = jwt_secret_path();
    if let Ok(existing) = std::fs::read_to_string(&secret_path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret = generate_token();
    if let Some(parent) = secret_path.parent()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        warn!(error = %e, "could not create secret directory");
    }
    if let Err(e) = std::fs::write(&secret_path, &secret) {
        warn!(error = %e, "could not persist signing secret; tokens will not survive restart");
    }
    info!(path = %secret_path.display(), "generated new signing secret");
    secret
}

fn jwt_secret_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("warden")
        .join("jwt-secret")
}
