//! Self-service profile updates under the per-role field policy.

use tracing::{debug, info};
use uuid::Uuid;
use warden_core::auth::field_policy;
use warden_core::auth::session::ClientInfo;
use warden_core::models::audit::AuditEventKind;
use warden_core::models::profile::ProfileChanges;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::{PrincipalSummary, ProfileUpdateRequest};
use crate::services::validate::{check_email, check_phone};

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl From<ProfileUpdateRequest> for ProfileChanges {
    fn from(req: ProfileUpdateRequest) -> Self {
        Self {
            name: trimmed(req.name),
            paternal_surname: trimmed(req.paternal_surname),
            maternal_surname: trimmed(req.maternal_surname),
            email: trimmed(req.email).map(|e| e.to_ascii_lowercase()),
            phone: trimmed(req.phone),
            enrollment_id: trimmed(req.enrollment_id),
        }
    }
}

/// Apply the fields the caller's role may edit; other fields are ignored.
pub async fn update(
    state: &AppState,
    user_id: Uuid,
    req: ProfileUpdateRequest,
    client: &ClientInfo,
) -> AppResult<PrincipalSummary> {
    let user = state
        .store
        .find_user_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired token".into()))?;

    let requested = ProfileChanges::from(req);
    let changes = field_policy::restrict(user.role, requested.clone());
    if changes.is_empty() {
        return Err(AppError::Validation(
            "No editable fields supplied for this role".into(),
        ));
    }
    if changes != requested {
        debug!(user_id = %user.id, role = %user.role, "ignoring fields outside the role's policy");
    }
    if let Some(email) = &changes.email {
        check_email(email)?;
    }
    if let Some(phone) = &changes.phone {
        check_phone(phone)?;
    }

    state.store.update_profile(user.id, &changes).await?;
    let updated = state
        .store
        .find_user_by_id(user.id)
        .await?
        .ok_or_else(|| AppError::Internal("account vanished during update".into()))?;

    let fields: Vec<&str> = changes
        .present_fields()
        .iter()
        .map(|f| f.as_str())
        .collect();
    state.audit(
        client,
        AuditEventKind::ProfileUpdated,
        Some(user.id),
        format!("Profile updated: {}", fields.join(", ")),
    );
    info!(user_id = %user.id, "profile updated");
    Ok(updated.principal().into())
}
