//! OAuth sign-in with Google (authorization code + PKCE) and Facebook
//! (authorization code).
//!
//! The authorize step stores a CSRF `state` value, and for Google a PKCE
//! verifier, in [`OAuthStateStore`]. The callback takes it back exactly once,
//! exchanges the code through an [`IdentityProvider`], links or provisions
//! the local account and redirects to the frontend with the token pair.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use dashmap::DashMap;
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use warden_core::auth::federation::{OAuthProvider, ProviderProfile};
use warden_core::auth::session::ClientInfo;
use warden_core::models::audit::AuditEventKind;
use warden_core::models::auth::AuthMethod;

use crate::AppState;
use crate::config::{ApiConfig, ProviderSettings};
use crate::error::{AppError, AppResult};
use crate::services::auth::issue_session;

/// TTL for pending authorizations (10 minutes).
const STATE_TTL: Duration = Duration::from_secs(600);

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";
const FACEBOOK_AUTH_URL: &str = "https://www.facebook.com/v19.0/dialog/oauth";
const FACEBOOK_TOKEN_URL: &str = "https://graph.facebook.com/v19.0/oauth/access_token";
const FACEBOOK_ME_URL: &str = "https://graph.facebook.com/me";

// =============================================================================
// PKCE helpers
// =============================================================================

/// Generate a PKCE code verifier (43 chars, URL-safe).
pub fn generate_code_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// S256 code challenge for a verifier.
pub fn compute_code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Generate a `state` parameter (CSRF token).
pub fn generate_state() -> String {
    let mut bytes = [0u8; 24];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

// =============================================================================
// State store
// =============================================================================

/// Pending authorization stored between the authorize redirect and the callback.
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    pub provider: OAuthProvider,
    pub pkce_verifier: Option<String>,
    pub created_at: Instant,
}

/// In-memory store of pending authorizations, keyed by `state`.
pub struct OAuthStateStore {
    states: DashMap<String, PendingAuthorization>,
    ttl: Duration,
}

impl OAuthStateStore {
    pub fn new() -> Self {
        Self::with_ttl(STATE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            states: DashMap::new(),
            ttl,
        }
    }

    pub fn insert(&self, state: String, pending: PendingAuthorization) {
        self.states.insert(state, pending);
    }

    /// Remove and return a pending entry. `None` if unknown or expired.
    pub fn take(&self, state: &str) -> Option<PendingAuthorization> {
        let (_, pending) = self.states.remove(state)?;
        if pending.created_at.elapsed() > self.ttl {
            return None;
        }
        Some(pending)
    }

    /// Evict expired entries.
    pub fn cleanup(&self) {
        let ttl = self.ttl;
        self.states.retain(|_, v| v.created_at.elapsed() <= ttl);
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Spawn a periodic cleanup task.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                store.cleanup();
            }
        })
    }
}

impl Default for OAuthStateStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Provider client
// =============================================================================

/// Exchanges an authorization code for the caller's provider profile.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn fetch_profile(
        &self,
        provider: OAuthProvider,
        settings: &ProviderSettings,
        code: &str,
        pkce_verifier: Option<&str>,
    ) -> AppResult<ProviderProfile>;
}

#[derive(Debug, Deserialize)]
struct ProviderTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    sub: String,
    email: Option<String>,
    email_verified: Option<bool>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FacebookUser {
    id: String,
    email: Option<String>,
    name: Option<String>,
}

/// Talks to the real provider endpoints over HTTPS.
#[derive(Clone, Default)]
pub struct HttpIdentityProvider {
    http: reqwest::Client,
}

impl HttpIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    async fn google(
        &self,
        settings: &ProviderSettings,
        code: &str,
        verifier: Option<&str>,
    ) -> AppResult<ProviderProfile> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", settings.client_id.as_str()),
            ("client_secret", settings.client_secret.as_str()),
            ("redirect_uri", settings.callback_url.as_str()),
        ];
        if let Some(verifier) = verifier {
            params.push(("code_verifier", verifier));
        }
        let resp = self
            .http
            .post(GOOGLE_TOKEN_URL)
            .form(&params)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("google token exchange: {e}")))?;
        let token: ProviderTokenResponse = read_json(resp, "google token exchange").await?;

        let resp = self
            .http
            .get(GOOGLE_USERINFO_URL)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("google userinfo: {e}")))?;
        let info: GoogleUserInfo = read_json(resp, "google userinfo").await?;

        Ok(ProviderProfile {
            provider: OAuthProvider::Google,
            subject: info.sub,
            // Unverified addresses must not link to an existing account.
            email: info.email.filter(|_| info.email_verified.unwrap_or(false)),
            display_name: info.name,
        })
    }

    async fn facebook(&self, settings: &ProviderSettings, code: &str) -> AppResult<ProviderProfile> {
        let resp = self
            .http
            .get(FACEBOOK_TOKEN_URL)
            .query(&[
                ("client_id", settings.client_id.as_str()),
                ("client_secret", settings.client_secret.as_str()),
                ("redirect_uri", settings.callback_url.as_str()),
                ("code", code),
            ])
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("facebook token exchange: {e}")))?;
        let token: ProviderTokenResponse = read_json(resp, "facebook token exchange").await?;

        let resp = self
            .http
            .get(FACEBOOK_ME_URL)
            .query(&[
                ("fields", "id,name,email"),
                ("access_token", token.access_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("facebook profile: {e}")))?;
        let user: FacebookUser = read_json(resp, "facebook profile").await?;

        Ok(ProviderProfile {
            provider: OAuthProvider::Facebook,
            subject: user.id,
            email: user.email,
            display_name: user.name,
        })
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
    what: &str,
) -> AppResult<T> {
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(AppError::Internal(format!("{what} HTTP {status}: {body}")));
    }
    resp.json::<T>()
        .await
        .map_err(|e| AppError::Internal(format!("{what} parse error: {e}")))
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn fetch_profile(
        &self,
        provider: OAuthProvider,
        settings: &ProviderSettings,
        code: &str,
        pkce_verifier: Option<&str>,
    ) -> AppResult<ProviderProfile> {
        match provider {
            OAuthProvider::Google => self.google(settings, code, pkce_verifier).await,
            OAuthProvider::Facebook => self.facebook(settings, code).await,
        }
    }
}

// =============================================================================
// Flow
// =============================================================================

/// Query parameters the provider sends to the callback.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Settings of an enabled provider, `None` when it is not configured.
pub fn settings_for(config: &ApiConfig, provider: OAuthProvider) -> Option<&ProviderSettings> {
    match provider {
        OAuthProvider::Google => config.google.as_ref(),
        OAuthProvider::Facebook => config.facebook.as_ref(),
    }
}

fn enabled_provider<'a>(
    config: &'a ApiConfig,
    name: &str,
) -> AppResult<(OAuthProvider, &'a ProviderSettings)> {
    let provider: OAuthProvider = name.parse()?;
    let settings = settings_for(config, provider)
        .ok_or_else(|| AppError::NotFound(format!("Provider '{provider}' is not enabled")))?;
    Ok((provider, settings))
}

/// Provider authorization URL.
pub fn authorization_url(
    provider: OAuthProvider,
    settings: &ProviderSettings,
    state: &str,
    code_challenge: Option<&str>,
) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    query
        .append_pair("client_id", &settings.client_id)
        .append_pair("redirect_uri", &settings.callback_url)
        .append_pair("response_type", "code")
        .append_pair("state", state);
    let base = match provider {
        OAuthProvider::Google => {
            query.append_pair("scope", "openid email profile");
            if let Some(challenge) = code_challenge {
                query
                    .append_pair("code_challenge", challenge)
                    .append_pair("code_challenge_method", "S256");
            }
            GOOGLE_AUTH_URL
        }
        OAuthProvider::Facebook => {
            query
                .append_pair("scope", "email,public_profile")
                .append_pair("auth_type", "rerequest");
            FACEBOOK_AUTH_URL
        }
    };
    format!("{base}?{}", query.finish())
}

/// Frontend login page URL carrying `pairs` as query parameters.
pub fn login_redirect(frontend_url: &str, pairs: &[(&str, &str)]) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();
    format!("{}/login?{query}", frontend_url.trim_end_matches('/'))
}

/// Start a sign-in: remember the state and return the provider URL.
pub fn begin(state: &AppState, provider_name: &str) -> AppResult<String> {
    let (provider, settings) = enabled_provider(&state.config, provider_name)?;
    let csrf = generate_state();
    let verifier = match provider {
        OAuthProvider::Google => Some(generate_code_verifier()),
        OAuthProvider::Facebook => None,
    };
    let challenge = verifier.as_deref().map(compute_code_challenge);
    let url = authorization_url(provider, settings, &csrf, challenge.as_deref());
    state.oauth_states.insert(
        csrf,
        PendingAuthorization {
            provider,
            pkce_verifier: verifier,
            created_at: Instant::now(),
        },
    );
    debug!(provider = %provider, "oauth authorization started");
    Ok(url)
}

/// Finish a sign-in. Always yields a frontend URL: tokens on success, an
/// `error` tag otherwise. Unknown or disabled providers are an error.
pub async fn complete(
    state: &AppState,
    provider_name: &str,
    params: CallbackParams,
    client: &ClientInfo,
) -> AppResult<String> {
    let (provider, settings) = enabled_provider(&state.config, provider_name)?;
    let frontend = state.config.frontend_url.as_str();
    let failure = |tag: &str| login_redirect(frontend, &[("error", tag)]);

    if params.error.is_some() {
        return Ok(failure("auth_cancelled"));
    }
    let Some(code) = params.code.as_deref().filter(|c| !c.is_empty()) else {
        return Ok(failure("auth_cancelled"));
    };
    let pending = params
        .state
        .as_deref()
        .and_then(|s| state.oauth_states.take(s))
        .filter(|p| p.provider == provider);
    let Some(pending) = pending else {
        warn!(provider = %provider, "oauth callback with unknown state");
        return Ok(failure("invalid_state"));
    };

    let profile = match state
        .identity_provider
        .fetch_profile(provider, settings, code, pending.pkce_verifier.as_deref())
        .await
    {
        Ok(profile) => profile,
        Err(e) => {
            warn!(provider = %provider, error = %e, "oauth code exchange failed");
            return Ok(failure("oauth_failed"));
        }
    };

    let user = match state.linker.link_or_provision(&profile).await {
        Ok(user) => user,
        Err(e) => {
            warn!(provider = %provider, error = %e, "oauth account linking failed");
            return Ok(failure("invalid_user"));
        }
    };
    let tokens = match issue_session(state, &user, AuthMethod::OAuth, client).await {
        Ok(tokens) => tokens,
        Err(e) => {
            warn!(user_id = %user.id, error = %e, "oauth session issue failed");
            return Ok(failure("oauth_failed"));
        }
    };

    state.audit(
        client,
        AuditEventKind::OAuthLogin,
        Some(user.id),
        format!("OAuth login ({provider})"),
    );
    info!(user_id = %user.id, provider = %provider, "oauth login");
    let user_id = user.id.to_string();
    Ok(login_redirect(
        frontend,
        &[
            ("accessToken", tokens.access_token.as_str()),
            ("refreshToken", tokens.refresh_token.as_str()),
            ("userId", user_id.as_str()),
            ("name", user.name.as_str()),
            ("email", user.email.as_str()),
        ],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ProviderSettings {
        ProviderSettings {
            client_id: "client-1".into(),
            client_secret: "secret".into(),
            callback_url: "http://localhost:4000/auth/oauth/google/callback".into(),
        }
    }

    #[test]
    fn code_challenge_is_s256_of_verifier() {
        // RFC 7636 appendix B.
        let verifier = "dBjftJeZ4CVP-mJ92K9cHCJgfA-4I8e9o9VK4ByWkLM";
        assert_eq!(
            compute_code_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
        assert_eq!(generate_code_verifier().len(), 43);
    }

    #[test]
    fn google_url_carries_pkce() {
        let url = authorization_url(OAuthProvider::Google, &settings(), "st", Some("ch"));
        assert!(url.starts_with(GOOGLE_AUTH_URL));
        assert!(url.contains("state=st"));
        assert!(url.contains("code_challenge=ch"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("scope=openid+email+profile"));
    }

    #[test]
    fn facebook_url_has_no_pkce() {
        let url = authorization_url(OAuthProvider::Facebook, &settings(), "st", None);
        assert!(url.starts_with(FACEBOOK_AUTH_URL));
        assert!(!url.contains("code_challenge"));
        assert!(url.contains("auth_type=rerequest"));
    }

    #[test]
    fn state_is_single_use() {
        let store = OAuthStateStore::new();
        store.insert(
            "abc".into(),
            PendingAuthorization {
                provider: OAuthProvider::Google,
                pkce_verifier: None,
                created_at: Instant::now(),
            },
        );
        assert!(store.take("abc").is_some());
        assert!(store.take("abc").is_none());
    }

    #[test]
    fn expired_state_is_rejected() {
        let store = OAuthStateStore::with_ttl(Duration::ZERO);
        store.insert(
            "abc".into(),
            PendingAuthorization {
                provider: OAuthProvider::Facebook,
                pkce_verifier: None,
                created_at: Instant::now() - Duration::from_millis(5),
            },
        );
        assert!(store.take("abc").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn login_redirect_encodes_values() {
        assert_eq!(
            login_redirect("http://app.test/", &[("error", "auth_cancelled")]),
            "http://app.test/login?error=auth_cancelled"
        );
        assert_eq!(
            login_redirect("http://app.test", &[("name", "Ana María")]),
            "http://app.test/login?name=Ana+Mar%C3%ADa"
        );
    }
}
