//! Self-service profile update models.

use serde::{Deserialize, Serialize};

/// A user-editable profile column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileField {
    Name,
    PaternalSurname,
    MaternalSurname,
    Email,
    Phone,
    EnrollmentId,
}

impl ProfileField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileField::Name => "name",
            ProfileField::PaternalSurname => "paternal_surname",
            ProfileField::MaternalSurname => "maternal_surname",
            ProfileField::Email => "email",
            ProfileField::Phone => "phone",
            ProfileField::EnrollmentId => "enrollment_id",
        }
    }
}

/// Requested profile changes; `None` means "leave untouched".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileChanges {
    pub name: Option<String>,
    pub paternal_surname: Option<String>,
    pub maternal_surname: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub enrollment_id: Option<String>,
}

impl ProfileChanges {
    /// Fields carrying a value.
    pub fn present_fields(&self) -> Vec<ProfileField> {
        let mut fields = Vec::new();
        if self.name.is_some() {
            fields.push(ProfileField::Name);
        }
        if self.paternal_surname.is_some() {
            fields.push(ProfileField::PaternalSurname);
        }
        if self.maternal_surname.is_some() {
            fields.push(ProfileField::MaternalSurname);
        }
        if self.email.is_some() {
            fields.push(ProfileField::Email);
        }
        if self.phone.is_some() {
            fields.push(ProfileField::Phone);
        }
        if self.enrollment_id.is_some() {
            fields.push(ProfileField::EnrollmentId);
        }
        fields
    }

    /// Drop the value of one field.
    pub fn clear(&mut self, field: ProfileField) {
        match field {
            ProfileField::Name => self.name = None,
            ProfileField::PaternalSurname => self.paternal_surname = None,
            ProfileField::MaternalSurname => self.maternal_surname = None,
            ProfileField::Email => self.email = None,
            ProfileField::Phone => self.phone = None,
            ProfileField::EnrollmentId => self.enrollment_id = None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.present_fields().is_empty()
    }
}
