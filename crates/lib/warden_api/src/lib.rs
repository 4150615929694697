//! # warden_api
//!
//! HTTP API library for Warden.

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post};
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;
use warden_core::audit::AuditSink;
use warden_core::auth::federation::IdentityLinker;
use warden_core::auth::jwt::TokenIssuer;
use warden_core::auth::otp::OneTimeCodeManager;
use warden_core::auth::recovery::RecoveryCodes;
use warden_core::auth::refresh::RefreshTokenService;
use warden_core::auth::session::{ClientInfo, SessionLedger};
use warden_core::models::audit::{AuditEvent, AuditEventKind};
use warden_core::store::AuthStore;
use warden_core::transport::{LogTransport, MessageTransport, TwilioSmsTransport};
use warden_core::webauthn::{CeremonyEngine, ChallengeStore};

use crate::config::ApiConfig;
use crate::error::AppResult;
use crate::handlers::{auth, oauth, otp, password, users, webauthn};
use crate::services::oauth::{HttpIdentityProvider, IdentityProvider, OAuthStateStore};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// API configuration.
    pub config: ApiConfig,
    pub store: Arc<dyn AuthStore>,
    pub tokens: TokenIssuer,
    pub refresh: RefreshTokenService,
    pub sessions: SessionLedger,
    pub otp: OneTimeCodeManager,
    pub recovery: RecoveryCodes,
    pub linker: IdentityLinker,
    pub webauthn: CeremonyEngine,
    pub audit: AuditSink,
    /// Delivery for SMS one-time codes.
    pub sms: Arc<dyn MessageTransport>,
    /// Delivery for email one-time codes and recovery codes.
    pub email: Arc<dyn MessageTransport>,
    pub oauth_states: Arc<OAuthStateStore>,
    pub identity_provider: Arc<dyn IdentityProvider>,
    challenges: Arc<ChallengeStore>,
}

impl AppState {
    /// Wire every component to `store`. Spawns the audit writer, so this must
    /// run inside a Tokio runtime.
    pub fn new<S>(config: ApiConfig, store: Arc<S>) -> AppResult<Self>
    where
        S: AuthStore + 'static,
    {
        let tokens = TokenIssuer::new(config.jwt_secret.as_bytes())?;
        let challenges = Arc::new(ChallengeStore::new());
        let webauthn = CeremonyEngine::new(
            config.relying_party.clone(),
            challenges.clone(),
            store.clone(),
        );
        let (audit, _writer) = AuditSink::spawn(store.clone());
        let sms: Arc<dyn MessageTransport> = match &config.twilio {
            Some(twilio) => Arc::new(TwilioSmsTransport::new(twilio.clone())),
            None => Arc::new(LogTransport::new("sms")),
        };

        Ok(Self {
            tokens,
            refresh: RefreshTokenService::new(store.clone()),
            sessions: SessionLedger::new(store.clone()),
            otp: OneTimeCodeManager::new(store.clone()),
            recovery: RecoveryCodes::new(store.clone()),
            linker: IdentityLinker::new(store.clone()),
            webauthn,
            audit,
            sms,
            email: Arc::new(LogTransport::new("email")),
            oauth_states: Arc::new(OAuthStateStore::new()),
            identity_provider: Arc::new(HttpIdentityProvider::new()),
            challenges,
            store,
            config,
        })
    }

    pub fn with_sms_transport(mut self, transport: Arc<dyn MessageTransport>) -> Self {
        self.sms = transport;
        self
    }

    pub fn with_email_transport(mut self, transport: Arc<dyn MessageTransport>) -> Self {
        self.email = transport;
        self
    }

    pub fn with_identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity_provider = provider;
        self
    }

    /// Override the bcrypt cost used for one-time codes.
    pub fn with_otp_hash_cost(mut self, cost: u32) -> Self {
        self.otp = self.otp.with_hash_cost(cost);
        self
    }

    /// Start periodic eviction of expired ceremony and OAuth state.
    pub fn spawn_cleanup_tasks(&self) -> Vec<JoinHandle<()>> {
        vec![
            self.challenges.spawn_cleanup_task(),
            self.oauth_states.spawn_cleanup_task(),
        ]
    }

    /// Queue an audit event stamped with the caller's origin.
    pub(crate) fn audit(
        &self,
        client: &ClientInfo,
        kind: AuditEventKind,
        user_id: Option<Uuid>,
        description: impl Into<String>,
    ) {
        self.audit.record(
            AuditEvent::new(kind, user_id, description)
                .with_ip(client.ip.clone())
                .with_device(client.device.clone()),
        );
    }
}

/// Run embedded database migrations.
///
/// Delegates to `warden_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    warden_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no auth required)
    let public = Router::new()
        .route("/auth/register", post(auth::register_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/refresh", post(auth::refresh_handler))
        .route("/auth/logout", post(auth::logout_handler))
        .route("/auth/check-email", get(auth::check_email_handler))
        .route("/auth/check-phone", get(auth::check_phone_handler))
        .route("/auth/oauth/failure", get(oauth::failure_handler))
        .route("/auth/oauth/{provider}", get(oauth::authorize_handler))
        .route("/auth/oauth/{provider}/callback", get(oauth::callback_handler))
        .route("/otp/send", post(otp::send_handler))
        .route("/otp/verify", post(otp::verify_handler))
        .route("/password/forgot", post(password::forgot_handler))
        .route("/password/reset", post(password::reset_handler))
        .route(
            "/webauthn/register/biometric/options",
            post(webauthn::sign_up_options_handler),
        )
        .route("/webauthn/register/biometric", post(webauthn::sign_up_handler))
        .route("/webauthn/auth/options", post(webauthn::auth_options_handler))
        .route("/webauthn/auth/verify", post(webauthn::auth_verify_handler))
        .route("/webauthn/kind/{email}", get(webauthn::kind_handler));

    // Protected routes (require auth)
    let protected = Router::new()
        .route("/auth/me", get(auth::me_handler))
        .route("/users/me", patch(users::update_me_handler))
        .route(
            "/webauthn/register/options",
            post(webauthn::register_options_handler),
        )
        .route(
            "/webauthn/register/verify",
            post(webauthn::register_verify_handler),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(cors)
        .with_state(state)
}
