//! Per-role table of self-editable profile fields.

use crate::models::auth::Role;
use crate::models::profile::{ProfileChanges, ProfileField};

const CONTACT_ONLY: &[ProfileField] = &[ProfileField::Email, ProfileField::Phone];

const PERSONAL: &[ProfileField] = &[
    ProfileField::Name,
    ProfileField::PaternalSurname,
    ProfileField::MaternalSurname,
    ProfileField::Email,
    ProfileField::Phone,
];

const ADMINISTRATIVE: &[ProfileField] = &[
    ProfileField::Name,
    ProfileField::PaternalSurname,
    ProfileField::MaternalSurname,
    ProfileField::Email,
    ProfileField::Phone,
    ProfileField::EnrollmentId,
];

/// Fields a principal of this role may change on their own profile.
pub fn editable_fields(role: Role) -> &'static [ProfileField] {
    match role {
        Role::Visitor => PERSONAL,
        Role::Student | Role::Teacher | Role::Librarian => CONTACT_ONLY,
        Role::Administrator => ADMINISTRATIVE,
    }
}

/// Drop every requested change the role may not make.
pub fn restrict(role: Role, mut changes: ProfileChanges) -> ProfileChanges {
    let allowed = editable_fields(role);
    for field in changes.present_fields() {
        if !allowed.contains(&field) {
            changes.clear(field);
        }
    }
    changes
}
