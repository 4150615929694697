//! Password authentication, token refresh and logout.
//!
//! Every successful sign-in, whatever the method, ends in [`issue_session`]:
//! mint an access token, rotate the refresh token, record the session and
//! queue an audit event.

use tracing::{info, warn};
use uuid::Uuid;
use warden_core::auth::{AuthError, ensure_active};
use warden_core::auth::password::{check_sign_in, hash_password, validate_new_password};
use warden_core::auth::session::ClientInfo;
use warden_core::models::audit::AuditEventKind;
use warden_core::models::auth::{AuthMethod, NewUser, Role, UserRecord};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::{
    ExistsResponse, LoginRequest, PrincipalSummary, RefreshRequest, RegisterRequest,
    RegisterResponse, TokenResponse,
};
use crate::services::validate::{check_email, check_phone, required};

/// Mint a token pair for `user` and open a session for it.
pub async fn issue_session(
    state: &AppState,
    user: &UserRecord,
    method: AuthMethod,
    client: &ClientInfo,
) -> AppResult<TokenResponse> {
    if let Err(e) = ensure_active(user) {
        warn!(user_id = %user.id, status = user.status.as_str(), method = ?method, "sign-in refused for account status");
        state.audit(
            client,
            AuditEventKind::LoginFailed,
            Some(user.id),
            format!("Sign-in refused ({} account)", user.status.as_str()),
        );
        return Err(e.into());
    }
    let ttl = method.access_ttl();
    let access_token = state.tokens.issue(user.id, user.role, method, ttl)?;
    let refresh_token = state.refresh.issue(user.id).await?;
    state.sessions.open(user.id, &access_token, client).await;

    Ok(TokenResponse {
        access_token,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: ttl.num_seconds(),
        user: user.principal().into(),
    })
}

/// Find the account a login identifier names for the claimed role.
async fn find_by_identifier(
    state: &AppState,
    identifier: &str,
    role: Role,
) -> AppResult<Option<UserRecord>> {
    let user = if role.signs_in_with_email() {
        state.store.find_user_by_email(identifier).await?
    } else {
        state.store.find_user_by_enrollment_id(identifier).await?
    };
    Ok(user)
}

/// Authenticate with an identifier, password and claimed role.
pub async fn login(
    state: &AppState,
    req: LoginRequest,
    client: &ClientInfo,
) -> AppResult<TokenResponse> {
    let identifier = required("identifier", req.identifier.as_deref())?;
    let password = required("password", req.password.as_deref())?;
    let role: Role = required("role", req.role.as_deref())?
        .parse()
        .map_err(|_| AppError::Validation("Unknown role".into()))?;

    let Some(user) = find_by_identifier(state, &identifier, role).await? else {
        state.audit(
            client,
            AuditEventKind::LoginFailed,
            None,
            format!("Unknown {role} identifier"),
        );
        return Err(AppError::Unauthorized("Invalid credentials".into()));
    };

    if let Err(e) = check_sign_in(&user, &password, role) {
        let reason = match e {
            AuthError::RoleMismatch => "role mismatch",
            _ => "bad password",
        };
        state.audit(
            client,
            AuditEventKind::LoginFailed,
            Some(user.id),
            format!("Login refused ({reason})"),
        );
        return Err(e.into());
    }

    let resp = issue_session(state, &user, AuthMethod::Password, client).await?;
    state.audit(
        client,
        AuditEventKind::LoginSucceeded,
        Some(user.id),
        format!("Login ({role})"),
    );
    info!(user_id = %user.id, role = %role, "password login");
    Ok(resp)
}

/// Validate a sign-up form and build the Visitor row it describes.
/// Duplicate email or phone yields 409.
pub(crate) async fn visitor_from_form(state: &AppState, req: RegisterRequest) -> AppResult<NewUser> {
    let name = required("name", req.name.as_deref())?;
    let paternal_surname = required("paternalSurname", req.paternal_surname.as_deref())?;
    let maternal_surname = required("maternalSurname", req.maternal_surname.as_deref())?;
    let email = required("email", req.email.as_deref())?.to_ascii_lowercase();
    let phone = required("phone", req.phone.as_deref())?;
    let password = required("password", req.password.as_deref())?;

    check_email(&email)?;
    check_phone(&phone)?;
    validate_new_password(&password)?;

    if state.store.find_user_by_email(&email).await?.is_some() {
        return Err(AppError::Conflict("Email already registered".into()));
    }
    if state.store.find_user_by_phone(&phone).await?.is_some() {
        return Err(AppError::Conflict("Phone already registered".into()));
    }

    Ok(NewUser {
        role: Role::Visitor,
        name,
        paternal_surname: Some(paternal_surname),
        maternal_surname: Some(maternal_surname),
        email,
        phone: Some(phone),
        password_hash: hash_password(&password)?,
        oauth_provider: None,
    })
}

/// Create a Visitor account with a password credential.
pub async fn register(
    state: &AppState,
    req: RegisterRequest,
    client: &ClientInfo,
) -> AppResult<RegisterResponse> {
    let new_user = visitor_from_form(state, req).await?;
    let user = state.store.create_user(new_user).await?;

    state.audit(
        client,
        AuditEventKind::Registration,
        Some(user.id),
        format!("Visitor registered: {}", user.email),
    );
    info!(user_id = %user.id, "visitor registered");
    Ok(RegisterResponse {
        message: "Visitor registered".into(),
        user: user.principal().into(),
    })
}

/// Exchange a refresh token for a new pair. The presented token is superseded.
pub async fn refresh(
    state: &AppState,
    req: RefreshRequest,
    client: &ClientInfo,
) -> AppResult<TokenResponse> {
    let (Some(user_id), Some(raw)) = (req.user_id, req.refresh_token.as_deref()) else {
        return Err(AppError::Validation("userId and refreshToken are required".into()));
    };
    let invalid = || AppError::Unauthorized("Invalid or expired refresh token".into());

    if !state.refresh.validate(user_id, raw).await? {
        return Err(invalid());
    }
    let user = state
        .store
        .find_user_by_id(user_id)
        .await?
        .ok_or_else(invalid)?;

    let resp = issue_session(state, &user, AuthMethod::Refresh, client).await?;
    state.audit(
        client,
        AuditEventKind::TokenRefreshed,
        Some(user.id),
        "Tokens rotated",
    );
    Ok(resp)
}

/// Close every session and revoke every refresh token of the token's owner.
pub async fn logout(state: &AppState, access_token: &str, client: &ClientInfo) -> AppResult<()> {
    let user_id = state
        .tokens
        .verify(access_token)
        .and_then(|claims| claims.principal_id())
        .ok_or_else(|| AppError::Forbidden("Invalid or expired token".into()))?;

    state.sessions.close_all(user_id).await?;
    state.refresh.revoke_all(user_id).await?;
    state.audit(client, AuditEventKind::Logout, Some(user_id), "Logout");
    info!(user_id = %user_id, "logout");
    Ok(())
}

/// Current principal of a verified token.
pub async fn me(state: &AppState, user_id: Uuid) -> AppResult<PrincipalSummary> {
    match state.store.find_user_by_id(user_id).await? {
        Some(user) => Ok(user.principal().into()),
        None => {
            warn!(user_id = %user_id, "token subject has no account");
            Err(AppError::Unauthorized("Invalid or expired token".into()))
        }
    }
}

pub async fn email_exists(state: &AppState, email: Option<&str>) -> AppResult<ExistsResponse> {
    let email = required("email", email)?;
    let exists = state.store.find_user_by_email(&email).await?.is_some();
    Ok(ExistsResponse { exists })
}

pub async fn phone_exists(state: &AppState, phone: Option<&str>) -> AppResult<ExistsResponse> {
    let phone = required("phone", phone)?;
    let exists = state.store.find_user_by_phone(&phone).await?.is_some();
    Ok(ExistsResponse { exists })
}
