//! Password hashing and password sign-in checks via bcrypt.

use super::AuthError;
use crate::models::auth::{NO_PASSWORD_SENTINEL, Role, UserRecord};

/// bcrypt cost factor.
const BCRYPT_COST: u32 = 12;

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Hash a password with bcrypt (cost 12).
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    bcrypt::hash(password, BCRYPT_COST)
        .map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))
}

/// Hash with an explicit cost. Used for one-time codes, which are short-lived.
pub fn hash_with_cost(secret: &str, cost: u32) -> Result<String, AuthError> {
    bcrypt::hash(secret, cost).map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))
}

/// Verify a password against a bcrypt hash.
///
/// The no-password sentinel never matches and never reaches bcrypt.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    if hash == NO_PASSWORD_SENTINEL {
        return Ok(false);
    }
    bcrypt::verify(password, hash).map_err(|e| AuthError::Internal(format!("bcrypt verify: {e}")))
}

/// Validate a new password before hashing.
pub fn validate_new_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::ValidationError(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Check a password sign-in attempt against a loaded account.
///
/// The password is checked before the role so a wrong role never reveals
/// whether the password was right.
pub fn check_sign_in(user: &UserRecord, password: &str, claimed: Role) -> Result<(), AuthError> {
    if !verify_password(password, &user.password_hash)? {
        return Err(AuthError::CredentialError);
    }
    if user.role != claimed {
        return Err(AuthError::RoleMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    fn user(role: Role, password_hash: String) -> UserRecord {
        UserRecord {
            id: Uuid::new_v4(),
            role,
            name: "Ana".into(),
            paternal_surname: None,
            maternal_surname: None,
            email: "ana@example.com".into(),
            phone: None,
            enrollment_id: Some("A001".into()),
            program: None,
            semester: None,
            password_hash,
            oauth_provider: None,
            status: Default::default(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn hash_and_verify() {
        let hash = hash_with_cost("hunter22", 4).unwrap();
        assert!(verify_password("hunter22", &hash).unwrap());
        assert!(!verify_password("hunter23", &hash).unwrap());
    }

    #[test]
    fn sentinel_never_matches() {
        assert!(!verify_password("", NO_PASSWORD_SENTINEL).unwrap());
        assert!(!verify_password(NO_PASSWORD_SENTINEL, NO_PASSWORD_SENTINEL).unwrap());
    }

    #[test]
    fn wrong_password_reported_before_role() {
        let u = user(Role::Student, hash_with_cost("right-pass", 4).unwrap());
        assert!(matches!(
            check_sign_in(&u, "wrong-pass", Role::Teacher),
            Err(AuthError::CredentialError)
        ));
        assert!(matches!(
            check_sign_in(&u, "right-pass", Role::Teacher),
            Err(AuthError::RoleMismatch)
        ));
        assert!(check_sign_in(&u, "right-pass", Role::Student).is_ok());
    }

    #[test]
    fn short_passwords_are_rejected() {
        assert!(validate_new_password("1234567").is_err());
        assert!(validate_new_password("12345678").is_ok());
    }
}
