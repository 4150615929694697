//! PostgreSQL store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    AuditStore, CredentialStore, OneTimeCodeStore, RecoveryStore, RefreshTokenStore,
    SessionStore, UserStore,
};
use crate::auth::AuthError;
use crate::models::audit::AuditEvent;
use crate::models::auth::{
    AccountStatus, CodeState, NewUser, OneTimeCodeRecord, OtpChannel, RecoveryCodeRecord, RefreshTokenRecord,
    Role, SessionRecord, TokenState, UserRecord,
};
use crate::models::profile::ProfileChanges;
use crate::models::webauthn::{BiometricKind, StoredCredential};
use crate::uuid::uuidv7;

const USER_COLUMNS: &str = "id, role, name, paternal_surname, maternal_surname, email, phone, \
     enrollment_id, program, semester, password_hash, oauth_provider, status, created_at";

const RECOVERY_COLUMNS: &str = "id, user_id, code_hash, failed_attempts, issued_at, expires_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn find_user_where(
        &self,
        predicate: &str,
        value: &str,
    ) -> Result<Option<UserRecord>, AuthError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {predicate}");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.map(UserRecord::try_from).transpose()
    }
}

/// Map unique-constraint violations on `users` to a conflict.
fn user_write_error(e: sqlx::Error) -> AuthError {
    if let Some(db) = e.as_database_error()
        && db.is_unique_violation()
    {
        let message = match db.constraint() {
            Some(c) if c.contains("phone") => "Phone already registered",
            Some(c) if c.contains("enrollment") => "Enrollment id already registered",
            _ => "Email already registered",
        };
        return AuthError::Conflict(message.into());
    }
    AuthError::DbError(e)
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    role: String,
    name: String,
    paternal_surname: Option<String>,
    maternal_surname: Option<String>,
    email: String,
    phone: Option<String>,
    enrollment_id: Option<String>,
    program: Option<String>,
    semester: Option<String>,
    password_hash: String,
    oauth_provider: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for UserRecord {
    type Error = AuthError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role: Role = row
            .role
            .parse()
            .map_err(|e| AuthError::Internal(format!("corrupt user row {}: {e}", row.id)))?;
        let status: AccountStatus = row
            .status
            .parse()
            .map_err(|e| AuthError::Internal(format!("corrupt user row {}: {e}", row.id)))?;
        Ok(UserRecord {
            id: row.id,
            role,
            name: row.name,
            paternal_surname: row.paternal_surname,
            maternal_surname: row.maternal_surname,
            email: row.email,
            phone: row.phone,
            enrollment_id: row.enrollment_id,
            program: row.program,
            semester: row.semester,
            password_hash: row.password_hash,
            oauth_provider: row.oauth_provider,
            status,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RefreshTokenRow {
    id: Uuid,
    user_id: Uuid,
    token_hash: String,
    state: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<RefreshTokenRow> for RefreshTokenRecord {
    fn from(row: RefreshTokenRow) -> Self {
        RefreshTokenRecord {
            id: row.id,
            user_id: row.user_id,
            token_hash: row.token_hash,
            state: TokenState::parse(&row.state),
            issued_at: row.issued_at,
            expires_at: row.expires_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CodeRow {
    id: Uuid,
    user_id: Uuid,
    channel: String,
    code_hash: String,
    state: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<CodeRow> for OneTimeCodeRecord {
    fn from(row: CodeRow) -> Self {
        OneTimeCodeRecord {
            id: row.id,
            user_id: row.user_id,
            channel: OtpChannel::parse(&row.channel),
            code_hash: row.code_hash,
            state: CodeState::parse(&row.state),
            issued_at: row.issued_at,
            expires_at: row.expires_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CredentialRow {
    user_id: Uuid,
    credential_id: Vec<u8>,
    public_key: Vec<u8>,
    prev_counter: i64,
    kind: String,
    extracted_manually: bool,
    registered_at: DateTime<Utc>,
}

impl TryFrom<CredentialRow> for StoredCredential {
    type Error = AuthError;

    fn try_from(row: CredentialRow) -> Result<Self, Self::Error> {
        let kind = BiometricKind::parse(&row.kind).ok_or_else(|| {
            AuthError::Internal(format!("unknown biometric kind '{}'", row.kind))
        })?;
        let prev_counter = u32::try_from(row.prev_counter)
            .map_err(|_| AuthError::Internal("signature counter out of range".into()))?;
        Ok(StoredCredential {
            user_id: row.user_id,
            credential_id: row.credential_id,
            public_key: row.public_key,
            prev_counter,
            kind,
            extracted_manually: row.extracted_manually,
            registered_at: row.registered_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RecoveryRow {
    id: Uuid,
    user_id: Uuid,
    code_hash: String,
    failed_attempts: i32,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<RecoveryRow> for RecoveryCodeRecord {
    fn from(row: RecoveryRow) -> Self {
        RecoveryCodeRecord {
            id: row.id,
            user_id: row.user_id,
            code_hash: row.code_hash,
            failed_attempts: u32::try_from(row.failed_attempts).unwrap_or_default(),
            issued_at: row.issued_at,
            expires_at: row.expires_at,
        }
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, AuthError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(UserRecord::try_from).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, AuthError> {
        self.find_user_where("lower(email) = lower($1)", email).await
    }

    async fn find_user_by_phone(&self, phone: &str) -> Result<Option<UserRecord>, AuthError> {
        self.find_user_where("phone = $1", phone).await
    }

    async fn find_user_by_enrollment_id(
        &self,
        enrollment_id: &str,
    ) -> Result<Option<UserRecord>, AuthError> {
        self.find_user_where("enrollment_id = $1", enrollment_id)
            .await
    }

    async fn create_user(&self, user: NewUser) -> Result<UserRecord, AuthError> {
        let sql = format!(
            "INSERT INTO users (role, name, paternal_surname, maternal_surname, email, phone, \
             password_hash, oauth_provider) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(user.role.as_str())
            .bind(&user.name)
            .bind(&user.paternal_surname)
            .bind(&user.maternal_surname)
            .bind(&user.email)
            .bind(&user.phone)
            .bind(&user.password_hash)
            .bind(&user.oauth_provider)
            .fetch_one(&self.pool)
            .await
            .map_err(user_write_error)?;
        UserRecord::try_from(row)
    }

    async fn create_user_with_credential(
        &self,
        user: NewUser,
        credential: &StoredCredential,
    ) -> Result<UserRecord, AuthError> {
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "INSERT INTO users (id, role, name, paternal_surname, maternal_surname, email, phone, \
             password_hash, oauth_provider) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(credential.user_id)
            .bind(user.role.as_str())
            .bind(&user.name)
            .bind(&user.paternal_surname)
            .bind(&user.maternal_surname)
            .bind(&user.email)
            .bind(&user.phone)
            .bind(&user.password_hash)
            .bind(&user.oauth_provider)
            .fetch_one(&mut *tx)
            .await
            .map_err(user_write_error)?;

        sqlx::query(
            "INSERT INTO webauthn_credentials \
               (user_id, credential_id, public_key, prev_counter, kind, extracted_manually, registered_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(credential.user_id)
        .bind(&credential.credential_id)
        .bind(&credential.public_key)
        .bind(i64::from(credential.prev_counter))
        .bind(credential.kind.as_str())
        .bind(credential.extracted_manually)
        .bind(credential.registered_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        UserRecord::try_from(row)
    }

    async fn set_account_status(&self, id: Uuid, status: AccountStatus) -> Result<(), AuthError> {
        let result = sqlx::query("UPDATE users SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AuthError::NotFound("User not found".into()));
        }
        Ok(())
    }

    async fn link_oauth_provider(&self, id: Uuid, provider: &str) -> Result<(), AuthError> {
        sqlx::query("UPDATE users SET oauth_provider = $2 WHERE id = $1 AND oauth_provider IS NULL")
            .bind(id)
            .bind(provider)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> Result<(), AuthError> {
        let result = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AuthError::NotFound("User not found".into()));
        }
        Ok(())
    }

    async fn update_profile(&self, id: Uuid, changes: &ProfileChanges) -> Result<(), AuthError> {
        let result = sqlx::query(
            "UPDATE users SET \
               name = COALESCE($2, name), \
               paternal_surname = COALESCE($3, paternal_surname), \
               maternal_surname = COALESCE($4, maternal_surname), \
               email = COALESCE($5, email), \
               phone = COALESCE($6, phone), \
               enrollment_id = COALESCE($7, enrollment_id) \
             WHERE id = $1",
        )
        .bind(id)
        .bind(&changes.name)
        .bind(&changes.paternal_surname)
        .bind(&changes.maternal_surname)
        .bind(&changes.email)
        .bind(&changes.phone)
        .bind(&changes.enrollment_id)
        .execute(&self.pool)
        .await
        .map_err(user_write_error)?;
        if result.rows_affected() == 0 {
            return Err(AuthError::NotFound("User not found".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RefreshTokenStore for PgStore {
    async fn rotate_refresh_token(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let mut tx = self.pool.begin().await?;

        // Serializes concurrent rotations for the same principal.
        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AuthError::NotFound("User not found".into()))?;

        sqlx::query(
            "UPDATE refresh_tokens SET state = 'revoked' WHERE user_id = $1 AND state = 'active'",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        // Stamped after the lock so rows order by rotation, not by
        // transaction start.
        let issued_at = Utc::now();
        sqlx::query(
            "INSERT INTO refresh_tokens (id, user_id, token_hash, state, issued_at, expires_at) \
             VALUES ($1, $2, $3, 'active', $4, $5)",
        )
        .bind(uuidv7())
        .bind(user_id)
        .bind(token_hash)
        .bind(issued_at)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn latest_refresh_token(
        &self,
        user_id: Uuid,
    ) -> Result<Option<RefreshTokenRecord>, AuthError> {
        let row = sqlx::query_as::<_, RefreshTokenRow>(
            "SELECT id, user_id, token_hash, state, issued_at, expires_at \
             FROM refresh_tokens WHERE user_id = $1 \
             ORDER BY issued_at DESC, id DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn revoke_refresh_tokens(&self, user_id: Uuid) -> Result<u64, AuthError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET state = 'revoked' WHERE user_id = $1 AND state = 'active'",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn purge_expired_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn insert_session(&self, session: &SessionRecord) -> Result<(), AuthError> {
        sqlx::query(
            "INSERT INTO sessions (id, user_id, token_hash, ip, device, opened_at, closed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(&session.token_hash)
        .bind(&session.ip)
        .bind(&session.device)
        .bind(session.opened_at)
        .bind(session.closed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_session(&self, user_id: Uuid) -> Result<Option<SessionRecord>, AuthError> {
        let row = sqlx::query_as::<
            _,
            (
                Uuid,
                Uuid,
                String,
                Option<String>,
                Option<String>,
                DateTime<Utc>,
                Option<DateTime<Utc>>,
            ),
        >(
            "SELECT id, user_id, token_hash, ip, device, opened_at, closed_at \
             FROM sessions WHERE user_id = $1 \
             ORDER BY opened_at DESC, id DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(
            |(id, user_id, token_hash, ip, device, opened_at, closed_at)| SessionRecord {
                id,
                user_id,
                token_hash,
                ip,
                device,
                opened_at,
                closed_at,
            },
        ))
    }

    async fn close_sessions(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<u64, AuthError> {
        let result = sqlx::query(
            "UPDATE sessions SET closed_at = $2 WHERE user_id = $1 AND closed_at IS NULL",
        )
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl OneTimeCodeStore for PgStore {
    async fn insert_code(&self, code: &OneTimeCodeRecord) -> Result<(), AuthError> {
        sqlx::query(
            "INSERT INTO one_time_codes (id, user_id, channel, code_hash, state, issued_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(code.id)
        .bind(code.user_id)
        .bind(code.channel.as_str())
        .bind(&code.code_hash)
        .bind(code.state.as_str())
        .bind(code.issued_at)
        .bind(code.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn consume_latest_code(
        &self,
        user_id: Uuid,
    ) -> Result<Option<OneTimeCodeRecord>, AuthError> {
        // A concurrent caller blocks on the row lock, then finds the row used
        // and gets no code. It never falls through to an older code.
        let row = sqlx::query_as::<_, CodeRow>(
            "UPDATE one_time_codes SET state = 'used' \
             WHERE id = ( \
                 SELECT id FROM one_time_codes \
                 WHERE user_id = $1 AND state = 'active' \
                 ORDER BY issued_at DESC, id DESC LIMIT 1 \
                 FOR UPDATE \
             ) \
             RETURNING id, user_id, channel, code_hash, 'active' AS state, issued_at, expires_at",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn purge_expired_codes(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let result = sqlx::query("DELETE FROM one_time_codes WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn find_credential(&self, user_id: Uuid) -> Result<Option<StoredCredential>, AuthError> {
        let row = sqlx::query_as::<_, CredentialRow>(
            "SELECT user_id, credential_id, public_key, prev_counter, kind, \
                    extracted_manually, registered_at \
             FROM webauthn_credentials WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(StoredCredential::try_from).transpose()
    }

    async fn upsert_credential(&self, credential: &StoredCredential) -> Result<(), AuthError> {
        sqlx::query(
            "INSERT INTO webauthn_credentials \
               (user_id, credential_id, public_key, prev_counter, kind, extracted_manually, registered_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (user_id) DO UPDATE SET \
               credential_id = EXCLUDED.credential_id, \
               public_key = EXCLUDED.public_key, \
               prev_counter = EXCLUDED.prev_counter, \
               kind = EXCLUDED.kind, \
               extracted_manually = EXCLUDED.extracted_manually, \
               registered_at = EXCLUDED.registered_at",
        )
        .bind(credential.user_id)
        .bind(&credential.credential_id)
        .bind(&credential.public_key)
        .bind(i64::from(credential.prev_counter))
        .bind(credential.kind.as_str())
        .bind(credential.extracted_manually)
        .bind(credential.registered_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn advance_counter(
        &self,
        user_id: Uuid,
        credential_id: &[u8],
        new_counter: u32,
    ) -> Result<bool, AuthError> {
        // The row lock taken by UPDATE serializes concurrent assertions; the
        // loser re-evaluates the predicate against the committed counter.
        let result = sqlx::query(
            "UPDATE webauthn_credentials SET prev_counter = $3 \
             WHERE user_id = $1 AND credential_id = $2 AND prev_counter < $3",
        )
        .bind(user_id)
        .bind(credential_id)
        .bind(i64::from(new_counter))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl RecoveryStore for PgStore {
    async fn replace_recovery_code(&self, code: &RecoveryCodeRecord) -> Result<(), AuthError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM recovery_codes WHERE user_id = $1")
            .bind(code.user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO recovery_codes (id, user_id, code_hash, failed_attempts, issued_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(code.id)
        .bind(code.user_id)
        .bind(&code.code_hash)
        .bind(i32::try_from(code.failed_attempts).unwrap_or(i32::MAX))
        .bind(code.issued_at)
        .bind(code.expires_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn current_recovery_code(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<RecoveryCodeRecord>, AuthError> {
        let sql = format!(
            "SELECT {RECOVERY_COLUMNS} FROM recovery_codes \
             WHERE user_id = $1 AND expires_at > $2 \
             ORDER BY issued_at DESC, id DESC LIMIT 1"
        );
        let row = sqlx::query_as::<_, RecoveryRow>(&sql)
            .bind(user_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn record_recovery_failure(&self, id: Uuid) -> Result<Option<u32>, AuthError> {
        let failures = sqlx::query_scalar::<_, i32>(
            "UPDATE recovery_codes SET failed_attempts = failed_attempts + 1 \
             WHERE id = $1 RETURNING failed_attempts",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(failures.map(|n| u32::try_from(n).unwrap_or_default()))
    }

    async fn take_recovery_code(&self, id: Uuid) -> Result<bool, AuthError> {
        let result = sqlx::query("DELETE FROM recovery_codes WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_recovery_codes(&self, user_id: Uuid) -> Result<(), AuthError> {
        sqlx::query("DELETE FROM recovery_codes WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired_recovery_codes(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let result = sqlx::query("DELETE FROM recovery_codes WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AuditStore for PgStore {
    async fn append_audit_event(&self, event: &AuditEvent) -> Result<(), AuthError> {
        sqlx::query(
            "INSERT INTO audit_events (id, user_id, kind, description, ip, device, occurred_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(uuidv7())
        .bind(event.user_id)
        .bind(event.kind.as_str())
        .bind(&event.description)
        .bind(&event.ip)
        .bind(&event.device)
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
