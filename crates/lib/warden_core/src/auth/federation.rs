//! Federated identity linking.
//!
//! Maps an external provider profile onto a local account, provisioning a
//! password-less Visitor account when none exists.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::AuthError;
use crate::models::auth::{NO_PASSWORD_SENTINEL, NewUser, Role, UserRecord};
use crate::store::UserStore;

/// Supported external identity providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    Google,
    Facebook,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::Facebook => "facebook",
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OAuthProvider {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "google" => Ok(OAuthProvider::Google),
            "facebook" => Ok(OAuthProvider::Facebook),
            other => Err(AuthError::NotFound(format!("unknown provider '{other}'"))),
        }
    }
}

/// What a provider tells us about the caller after a successful callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub provider: OAuthProvider,
    /// Stable subject id at the provider.
    pub subject: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl ProviderProfile {
    /// Email to key the local account on. Providers that withhold email get a
    /// deterministic placeholder scoped to provider and subject.
    pub fn account_email(&self) -> String {
        match self.email.as_deref().map(str::trim) {
            Some(email) if !email.is_empty() => email.to_ascii_lowercase(),
            _ => format!("{}_{}@temp.oauth", self.provider.as_str(), self.subject),
        }
    }
}

#[derive(Clone)]
pub struct IdentityLinker {
    store: Arc<dyn UserStore>,
}

impl IdentityLinker {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    /// Resolve a provider profile to a local account.
    ///
    /// Existing accounts only gain the provider tag when they have none.
    pub async fn link_or_provision(&self, profile: &ProviderProfile) -> Result<UserRecord, AuthError> {
        let email = profile.account_email();
        if let Some(user) = self.link_existing(&email, profile.provider).await? {
            return Ok(user);
        }

        let new_user = NewUser {
            role: Role::DEFAULT,
            name: profile
                .display_name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| profile.provider.to_string()),
            paternal_surname: None,
            maternal_surname: None,
            email: email.clone(),
            phone: None,
            password_hash: NO_PASSWORD_SENTINEL.to_string(),
            oauth_provider: Some(profile.provider.as_str().to_string()),
        };
        match self.store.create_user(new_user).await {
            Ok(user) => {
                info!(user_id = %user.id, provider = %profile.provider, "provisioned federated account");
                Ok(user)
            }
            // Lost a race with a concurrent callback for the same address.
            Err(AuthError::Conflict(_)) => self
                .link_existing(&email, profile.provider)
                .await?
                .ok_or_else(|| AuthError::Internal("account vanished after conflict".into())),
            Err(e) => Err(e),
        }
    }

    async fn link_existing(
        &self,
        email: &str,
        provider: OAuthProvider,
    ) -> Result<Option<UserRecord>, AuthError> {
        let Some(mut user) = self.store.find_user_by_email(email).await? else {
            return Ok(None);
        };
        if user.oauth_provider.is_none() {
            self.store.link_oauth_provider(user.id, provider.as_str()).await?;
            user.oauth_provider = Some(provider.as_str().to_string());
            info!(user_id = %user.id, provider = %provider, "linked provider to existing account");
        }
        Ok(Some(user))
    }
}
