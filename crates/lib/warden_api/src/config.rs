//! API server configuration.

use warden_core::auth::jwt::resolve_jwt_secret;
use warden_core::transport::TwilioConfig;
use warden_core::webauthn::RelyingParty;

/// Client credentials for one OAuth provider.
#[derive(Clone, Debug)]
pub struct ProviderSettings {
    pub client_id: String,
    pub client_secret: String,
    /// Redirect URI registered with the provider.
    pub callback_url: String,
}

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:4000").
    pub bind_addr: String,
    /// JWT signing secret.
    pub jwt_secret: String,
    /// Frontend base URL that OAuth callbacks redirect to.
    pub frontend_url: String,
    /// WebAuthn relying party.
    pub relying_party: RelyingParty,
    /// Google OAuth. `None` disables the provider.
    pub google: Option<ProviderSettings>,
    /// Facebook OAuth. `None` disables the provider.
    pub facebook: Option<ProviderSettings>,
    /// Prefix for phone numbers submitted without one, e.g. "+52".
    pub default_country_code: String,
    /// Twilio credentials. `None` logs SMS instead of sending them.
    pub twilio: Option<TwilioConfig>,
}

impl ApiConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                         | Default                                  |
    /// |----------------------------------|------------------------------------------|
    /// | `BIND_ADDR`                      | `127.0.0.1:4000`                         |
    /// | `JWT_SECRET` / `AUTH_SECRET`     | generated & persisted to file            |
    /// | `FRONTEND_URL`                   | `http://localhost:3000`                  |
    /// | `RP_ID`                          | `localhost`                              |
    /// | `RP_NAME`                        | `Warden`                                 |
    /// | `RP_ORIGIN`                      | `https://{RP_ID}`                        |
    /// | `GOOGLE_CLIENT_ID` / `_SECRET`   | unset (provider disabled)                |
    /// | `GOOGLE_CALLBACK_URL`            | `http://{BIND_ADDR}/auth/oauth/google/callback` |
    /// | `FACEBOOK_CLIENT_ID` / `_SECRET` | unset (provider disabled)                |
    /// | `FACEBOOK_CALLBACK_URL`          | `http://{BIND_ADDR}/auth/oauth/facebook/callback` |
    /// | `DEFAULT_COUNTRY_CODE`           | `+52`                                    |
    /// | `TWILIO_ACCOUNT_SID` / `TWILIO_AUTH_TOKEN` / `TWILIO_FROM_NUMBER` | unset (SMS logged only) |
    pub fn from_env() -> Self {
        let bind_addr = env_or("BIND_ADDR", "127.0.0.1:4000");
        let rp_id = env_or("RP_ID", "localhost");
        let rp_origin = env_or("RP_ORIGIN", &format!("https://{rp_id}"));
        let relying_party = RelyingParty::new(rp_id, env_or("RP_NAME", "Warden"), rp_origin);

        Self {
            jwt_secret: resolve_jwt_secret(),
            frontend_url: env_or("FRONTEND_URL", "http://localhost:3000"),
            relying_party,
            google: provider_from_env("GOOGLE", "google", &bind_addr),
            facebook: provider_from_env("FACEBOOK", "facebook", &bind_addr),
            default_country_code: env_or("DEFAULT_COUNTRY_CODE", "+52"),
            twilio: twilio_from_env(),
            bind_addr,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn provider_from_env(prefix: &str, name: &str, bind_addr: &str) -> Option<ProviderSettings> {
    let client_id = env_opt(&format!("{prefix}_CLIENT_ID"))?;
    let client_secret = env_opt(&format!("{prefix}_CLIENT_SECRET"))?;
    let callback_url = env_opt(&format!("{prefix}_CALLBACK_URL"))
        .unwrap_or_else(|| format!("http://{bind_addr}/auth/oauth/{name}/callback"));
    Some(ProviderSettings {
        client_id,
        client_secret,
        callback_url,
    })
}

fn twilio_from_env() -> Option<TwilioConfig> {
    Some(TwilioConfig {
        account_sid: env_opt("TWILIO_ACCOUNT_SID")?,
        auth_token: env_opt("TWILIO_AUTH_TOKEN")?,
        from_number: env_opt("TWILIO_FROM_NUMBER").or_else(|| env_opt("TWILIO_PHONE_NUMBER"))?,
    })
}
