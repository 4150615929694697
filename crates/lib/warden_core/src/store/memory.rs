//! In-process store.
//!
//! Every table sits behind one `tokio::sync::Mutex`, so each trait method is
//! atomic with respect to every other. Backs the test suite and the server's
//! `--memory-store` development mode.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    AuditStore, CredentialStore, OneTimeCodeStore, RecoveryStore, RefreshTokenStore,
    SessionStore, UserStore,
};
use crate::auth::AuthError;
use crate::models::audit::AuditEvent;
use crate::models::auth::{
    AccountStatus, CodeState, NewUser, OneTimeCodeRecord, RecoveryCodeRecord, RefreshTokenRecord, SessionRecord,
    TokenState, UserRecord,
};
use crate::models::profile::ProfileChanges;
use crate::models::webauthn::StoredCredential;
use crate::uuid::uuidv7;

#[derive(Default)]
struct Tables {
    users: Vec<UserRecord>,
    refresh_tokens: Vec<RefreshTokenRecord>,
    sessions: Vec<SessionRecord>,
    codes: Vec<OneTimeCodeRecord>,
    credentials: HashMap<Uuid, StoredCredential>,
    recovery_codes: Vec<RecoveryCodeRecord>,
    audit: Vec<AuditEvent>,
}

impl Tables {
    fn email_taken(&self, email: &str, except: Option<Uuid>) -> bool {
        self.users
            .iter()
            .any(|u| Some(u.id) != except && u.email.eq_ignore_ascii_case(email))
    }

    fn phone_taken(&self, phone: &str, except: Option<Uuid>) -> bool {
        self.users
            .iter()
            .any(|u| Some(u.id) != except && u.phone.as_deref() == Some(phone))
    }

    fn insert_new_user(&mut self, id: Uuid, user: NewUser) -> Result<UserRecord, AuthError> {
        if self.email_taken(&user.email, None) {
            return Err(AuthError::Conflict("Email already registered".into()));
        }
        if let Some(phone) = &user.phone
            && self.phone_taken(phone, None)
        {
            return Err(AuthError::Conflict("Phone already registered".into()));
        }
        let record = UserRecord {
            id,
            role: user.role,
            name: user.name,
            paternal_surname: user.paternal_surname,
            maternal_surname: user.maternal_surname,
            email: user.email,
            phone: user.phone,
            enrollment_id: None,
            program: None,
            semester: None,
            password_hash: user.password_hash,
            oauth_provider: user.oauth_provider,
            status: AccountStatus::Active,
            created_at: Utc::now(),
        };
        self.users.push(record.clone());
        Ok(record)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_audit: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully specified user row (enrollment id, program, role).
    pub async fn insert_user(&self, user: UserRecord) -> Result<UserRecord, AuthError> {
        let mut t = self.tables.lock().await;
        if t.email_taken(&user.email, None) {
            return Err(AuthError::Conflict("Email already registered".into()));
        }
        t.users.push(user.clone());
        Ok(user)
    }

    /// Make every audit write fail.
    pub fn fail_audit_writes(&self, fail: bool) {
        self.fail_audit.store(fail, Ordering::SeqCst);
    }

    pub async fn audit_events(&self) -> Vec<AuditEvent> {
        self.tables.lock().await.audit.clone()
    }

    pub async fn sessions_for(&self, user_id: Uuid) -> Vec<SessionRecord> {
        let t = self.tables.lock().await;
        t.sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn refresh_tokens_for(&self, user_id: Uuid) -> Vec<RefreshTokenRecord> {
        let t = self.tables.lock().await;
        t.refresh_tokens
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, AuthError> {
        let t = self.tables.lock().await;
        Ok(t.users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, AuthError> {
        let t = self.tables.lock().await;
        Ok(t.users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_user_by_phone(&self, phone: &str) -> Result<Option<UserRecord>, AuthError> {
        let t = self.tables.lock().await;
        Ok(t.users
            .iter()
            .find(|u| u.phone.as_deref() == Some(phone))
            .cloned())
    }

    async fn find_user_by_enrollment_id(
        &self,
        enrollment_id: &str,
    ) -> Result<Option<UserRecord>, AuthError> {
        let t = self.tables.lock().await;
        Ok(t.users
            .iter()
            .find(|u| u.enrollment_id.as_deref() == Some(enrollment_id))
            .cloned())
    }

    async fn create_user(&self, user: NewUser) -> Result<UserRecord, AuthError> {
        let mut t = self.tables.lock().await;
        let record = t.insert_new_user(Uuid::new_v4(), user)?;
        Ok(record)
    }

    async fn create_user_with_credential(
        &self,
        user: NewUser,
        credential: &StoredCredential,
    ) -> Result<UserRecord, AuthError> {
        let mut t = self.tables.lock().await;
        if t.users.iter().any(|u| u.id == credential.user_id) {
            return Err(AuthError::Conflict("Account already exists".into()));
        }
        let record = t.insert_new_user(credential.user_id, user)?;
        t.credentials.insert(credential.user_id, credential.clone());
        Ok(record)
    }

    async fn set_account_status(&self, id: Uuid, status: AccountStatus) -> Result<(), AuthError> {
        let mut t = self.tables.lock().await;
        let user = t
            .users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| AuthError::NotFound("User not found".into()))?;
        user.status = status;
        Ok(())
    }

    async fn link_oauth_provider(&self, id: Uuid, provider: &str) -> Result<(), AuthError> {
        let mut t = self.tables.lock().await;
        if let Some(user) = t.users.iter_mut().find(|u| u.id == id)
            && user.oauth_provider.is_none()
        {
            user.oauth_provider = Some(provider.to_string());
        }
        Ok(())
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> Result<(), AuthError> {
        let mut t = self.tables.lock().await;
        let user = t
            .users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| AuthError::NotFound("User not found".into()))?;
        user.password_hash = password_hash.to_string();
        Ok(())
    }

    async fn update_profile(&self, id: Uuid, changes: &ProfileChanges) -> Result<(), AuthError> {
        let mut t = self.tables.lock().await;
        if let Some(email) = &changes.email
            && t.email_taken(email, Some(id))
        {
            return Err(AuthError::Conflict("Email already registered".into()));
        }
        if let Some(phone) = &changes.phone
            && t.phone_taken(phone, Some(id))
        {
            return Err(AuthError::Conflict("Phone already registered".into()));
        }
        let user = t
            .users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| AuthError::NotFound("User not found".into()))?;
        if let Some(v) = &changes.name {
            user.name = v.clone();
        }
        if let Some(v) = &changes.paternal_surname {
            user.paternal_surname = Some(v.clone());
        }
        if let Some(v) = &changes.maternal_surname {
            user.maternal_surname = Some(v.clone());
        }
        if let Some(v) = &changes.email {
            user.email = v.clone();
        }
        if let Some(v) = &changes.phone {
            user.phone = Some(v.clone());
        }
        if let Some(v) = &changes.enrollment_id {
            user.enrollment_id = Some(v.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStore {
    async fn rotate_refresh_token(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let mut t = self.tables.lock().await;
        for row in t
            .refresh_tokens
            .iter_mut()
            .filter(|r| r.user_id == user_id && r.state == TokenState::Active)
        {
            row.state = TokenState::Revoked;
        }
        t.refresh_tokens.push(RefreshTokenRecord {
            id: uuidv7(),
            user_id,
            token_hash: token_hash.to_string(),
            state: TokenState::Active,
            issued_at: Utc::now(),
            expires_at,
        });
        Ok(())
    }

    async fn latest_refresh_token(
        &self,
        user_id: Uuid,
    ) -> Result<Option<RefreshTokenRecord>, AuthError> {
        let t = self.tables.lock().await;
        Ok(t.refresh_tokens
            .iter()
            .rev()
            .find(|r| r.user_id == user_id)
            .cloned())
    }

    async fn revoke_refresh_tokens(&self, user_id: Uuid) -> Result<u64, AuthError> {
        let mut t = self.tables.lock().await;
        let mut n = 0;
        for row in t
            .refresh_tokens
            .iter_mut()
            .filter(|r| r.user_id == user_id && r.state == TokenState::Active)
        {
            row.state = TokenState::Revoked;
            n += 1;
        }
        Ok(n)
    }

    async fn purge_expired_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let mut t = self.tables.lock().await;
        let before = t.refresh_tokens.len();
        t.refresh_tokens.retain(|r| r.expires_at > now);
        Ok((before - t.refresh_tokens.len()) as u64)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: &SessionRecord) -> Result<(), AuthError> {
        self.tables.lock().await.sessions.push(session.clone());
        Ok(())
    }

    async fn latest_session(&self, user_id: Uuid) -> Result<Option<SessionRecord>, AuthError> {
        let t = self.tables.lock().await;
        Ok(t.sessions.iter().rev().find(|s| s.user_id == user_id).cloned())
    }

    async fn close_sessions(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<u64, AuthError> {
        let mut t = self.tables.lock().await;
        let mut n = 0;
        for s in t
            .sessions
            .iter_mut()
            .filter(|s| s.user_id == user_id && s.closed_at.is_none())
        {
            s.closed_at = Some(at);
            n += 1;
        }
        Ok(n)
    }
}

#[async_trait]
impl OneTimeCodeStore for MemoryStore {
    async fn insert_code(&self, code: &OneTimeCodeRecord) -> Result<(), AuthError> {
        self.tables.lock().await.codes.push(code.clone());
        Ok(())
    }

    async fn consume_latest_code(
        &self,
        user_id: Uuid,
    ) -> Result<Option<OneTimeCodeRecord>, AuthError> {
        let mut t = self.tables.lock().await;
        let Some(row) = t
            .codes
            .iter_mut()
            .rev()
            .find(|c| c.user_id == user_id && c.state == CodeState::Active)
        else {
            return Ok(None);
        };
        let before = row.clone();
        row.state = CodeState::Used;
        Ok(Some(before))
    }

    async fn purge_expired_codes(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let mut t = self.tables.lock().await;
        let before = t.codes.len();
        t.codes.retain(|c| c.expires_at > now);
        Ok((before - t.codes.len()) as u64)
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_credential(&self, user_id: Uuid) -> Result<Option<StoredCredential>, AuthError> {
        Ok(self.tables.lock().await.credentials.get(&user_id).cloned())
    }

    async fn upsert_credential(&self, credential: &StoredCredential) -> Result<(), AuthError> {
        self.tables
            .lock()
            .await
            .credentials
            .insert(credential.user_id, credential.clone());
        Ok(())
    }

    async fn advance_counter(
        &self,
        user_id: Uuid,
        credential_id: &[u8],
        new_counter: u32,
    ) -> Result<bool, AuthError> {
        let mut t = self.tables.lock().await;
        match t.credentials.get_mut(&user_id) {
            Some(c) if c.credential_id == credential_id && c.prev_counter < new_counter => {
                c.prev_counter = new_counter;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl RecoveryStore for MemoryStore {
    async fn replace_recovery_code(&self, code: &RecoveryCodeRecord) -> Result<(), AuthError> {
        let mut t = self.tables.lock().await;
        t.recovery_codes.retain(|c| c.user_id != code.user_id);
        t.recovery_codes.push(code.clone());
        Ok(())
    }

    async fn current_recovery_code(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<RecoveryCodeRecord>, AuthError> {
        let t = self.tables.lock().await;
        Ok(t.recovery_codes
            .iter()
            .rev()
            .find(|c| c.user_id == user_id && c.expires_at > now)
            .cloned())
    }

    async fn record_recovery_failure(&self, id: Uuid) -> Result<Option<u32>, AuthError> {
        let mut t = self.tables.lock().await;
        Ok(t.recovery_codes.iter_mut().find(|c| c.id == id).map(|c| {
            c.failed_attempts += 1;
            c.failed_attempts
        }))
    }

    async fn take_recovery_code(&self, id: Uuid) -> Result<bool, AuthError> {
        let mut t = self.tables.lock().await;
        let before = t.recovery_codes.len();
        t.recovery_codes.retain(|c| c.id != id);
        Ok(t.recovery_codes.len() < before)
    }

    async fn delete_recovery_codes(&self, user_id: Uuid) -> Result<(), AuthError> {
        self.tables
            .lock()
            .await
            .recovery_codes
            .retain(|c| c.user_id != user_id);
        Ok(())
    }

    async fn purge_expired_recovery_codes(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let mut t = self.tables.lock().await;
        let before = t.recovery_codes.len();
        t.recovery_codes.retain(|c| c.expires_at > now);
        Ok((before - t.recovery_codes.len()) as u64)
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append_audit_event(&self, event: &AuditEvent) -> Result<(), AuthError> {
        if self.fail_audit.load(Ordering::SeqCst) {
            return Err(AuthError::Internal("audit log unavailable".into()));
        }
        self.tables.lock().await.audit.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::auth::Role;

    fn new_user(email: &str, phone: Option<&str>) -> NewUser {
        NewUser {
            role: Role::Visitor,
            name: "Ana".into(),
            paternal_surname: None,
            maternal_surname: None,
            email: email.into(),
            phone: phone.map(String::from),
            password_hash: "x".into(),
            oauth_provider: None,
        }
    }

    #[tokio::test]
    async fn duplicate_email_or_phone_conflicts() {
        let store = MemoryStore::new();
        store
            .create_user(new_user("a@example.com", Some("+525512345678")))
            .await
            .unwrap();
        assert!(matches!(
            store.create_user(new_user("A@example.com", None)).await,
            Err(AuthError::Conflict(_))
        ));
        assert!(matches!(
            store
                .create_user(new_user("b@example.com", Some("+525512345678")))
                .await,
            Err(AuthError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn counter_only_moves_forward() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        store
            .upsert_credential(&StoredCredential {
                user_id,
                credential_id: vec![1, 2, 3],
                public_key: vec![],
                prev_counter: 5,
                kind: crate::models::webauthn::BiometricKind::Fingerprint,
                extracted_manually: false,
                registered_at: Utc::now(),
            })
            .await
            .unwrap();
        assert!(!store.advance_counter(user_id, &[1, 2, 3], 5).await.unwrap());
        assert!(!store.advance_counter(user_id, &[9], 6).await.unwrap());
        assert!(store.advance_counter(user_id, &[1, 2, 3], 6).await.unwrap());
        assert!(!store.advance_counter(user_id, &[1, 2, 3], 6).await.unwrap());
    }
}
