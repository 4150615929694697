//! Shared fixtures: an in-memory store, recording transports and a stub
//! identity provider wired into a full router.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use chrono::Utc;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;
use warden_api::config::{ApiConfig, ProviderSettings};
use warden_api::error::{AppError, AppResult};
use warden_api::services::oauth::IdentityProvider;
use warden_api::{AppState, router};
use warden_core::auth::federation::{OAuthProvider, ProviderProfile};
use warden_core::auth::password::hash_with_cost;
use warden_core::models::audit::{AuditEvent, AuditEventKind};
use warden_core::models::auth::{AccountStatus, Role, UserRecord};
use warden_core::store::memory::MemoryStore;
use warden_core::transport::RecordingTransport;
use warden_core::webauthn::RelyingParty;

pub const PASSWORD: &str = "Sup3r-secret!";

pub fn relying_party() -> RelyingParty {
    RelyingParty::new("localhost", "Warden", "https://localhost")
}

pub fn test_config() -> ApiConfig {
    ApiConfig {
        bind_addr: "127.0.0.1:0".into(),
        jwt_secret: "integration-test-secret-with-enough-bytes".into(),
        frontend_url: "http://frontend.test".into(),
        relying_party: relying_party(),
        google: Some(ProviderSettings {
            client_id: "google-client".into(),
            client_secret: "google-secret".into(),
            callback_url: "http://api.test/auth/oauth/google/callback".into(),
        }),
        facebook: None,
        default_country_code: "+52".into(),
        twilio: None,
    }
}

/// Returns whatever profile the test queued, or fails the exchange.
#[derive(Default)]
pub struct StubIdentityProvider {
    profile: Mutex<Option<ProviderProfile>>,
}

impl StubIdentityProvider {
    pub fn answer_with(&self, profile: ProviderProfile) {
        if let Ok(mut slot) = self.profile.lock() {
            *slot = Some(profile);
        }
    }
}

#[async_trait]
impl IdentityProvider for StubIdentityProvider {
    async fn fetch_profile(
        &self,
        provider: OAuthProvider,
        _settings: &ProviderSettings,
        code: &str,
        _pkce_verifier: Option<&str>,
    ) -> AppResult<ProviderProfile> {
        let profile = self.profile.lock().ok().and_then(|p| p.clone());
        match profile {
            Some(profile) if profile.provider == provider && code == "good-code" => Ok(profile),
            _ => Err(AppError::Unauthorized("exchange refused".into())),
        }
    }
}

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub sms: Arc<RecordingTransport>,
    pub email: Arc<RecordingTransport>,
    pub provider: Arc<StubIdentityProvider>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_email(RecordingTransport::new()).await
    }

    /// Same as [`TestApp::new`] but delivering email through `email`.
    pub async fn with_email(email: RecordingTransport) -> Self {
        let store = Arc::new(MemoryStore::new());
        let sms = Arc::new(RecordingTransport::new());
        let email = Arc::new(email);
        let provider = Arc::new(StubIdentityProvider::default());
        let state = AppState::new(test_config(), store.clone())
            .expect("state")
            .with_sms_transport(sms.clone())
            .with_email_transport(email.clone())
            .with_identity_provider(provider.clone())
            .with_otp_hash_cost(4);
        Self {
            app: router(state.clone()),
            state,
            store,
            sms,
            email,
            provider,
        }
    }

    pub async fn seed_user(
        &self,
        role: Role,
        email: &str,
        phone: &str,
        enrollment_id: Option<&str>,
    ) -> UserRecord {
        self.store
            .insert_user(UserRecord {
                id: Uuid::new_v4(),
                role,
                name: "Ana".into(),
                paternal_surname: Some("Lopez".into()),
                maternal_surname: Some("Ruiz".into()),
                email: email.into(),
                phone: Some(phone.into()),
                enrollment_id: enrollment_id.map(str::to_string),
                program: None,
                semester: None,
                password_hash: hash_with_cost(PASSWORD, 4).expect("hash"),
                oauth_provider: None,
                status: AccountStatus::Active,
                created_at: Utc::now(),
            })
            .await
            .expect("insert user")
    }

    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        bearer: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = self.app.clone().oneshot(req).await.expect("request");
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .expect("read body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// POST `body` verbatim as `application/json`.
    pub async fn post_raw(&self, uri: &str, body: &str) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = self.app.clone().oneshot(req).await.expect("request");
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .expect("read body");
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    /// Redirect status and `Location` of a GET.
    pub async fn redirect(&self, uri: &str) -> (StatusCode, String) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = self.app.clone().oneshot(req).await.expect("request");
        let location = resp
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        (resp.status(), location)
    }

    pub async fn login(&self, identifier: &str, role: &str) -> Value {
        let (status, body) = self
            .call(
                Method::POST,
                "/auth/login",
                None,
                Some(serde_json::json!({
                    "identifier": identifier,
                    "password": PASSWORD,
                    "role": role,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
        body
    }
}

/// Query parameter `key` of an absolute URL.
pub fn query_param(location: &str, key: &str) -> Option<String> {
    url::Url::parse(location)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// First run of at least four digits in a delivered message.
pub fn code_in(payload: &str) -> String {
    payload
        .split(|c: char| !c.is_ascii_digit())
        .find(|run| run.len() >= 4)
        .expect("message carries a code")
        .to_string()
}

/// Poll the store until the background writer has persisted an event of `kind`.
pub async fn wait_for_audit(store: &MemoryStore, kind: AuditEventKind) -> Vec<AuditEvent> {
    for _ in 0..50 {
        let events = store.audit_events().await;
        if events.iter().any(|e| e.kind == kind) {
            return events;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("no {kind:?} audit event recorded");
}
