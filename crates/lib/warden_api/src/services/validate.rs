//! Input checks shared by handlers.

use crate::error::{AppError, AppResult};

/// Phone numbers carry 8 to 15 digits, optionally after a leading `+`.
const PHONE_DIGITS: std::ops::RangeInclusive<usize> = 8..=15;

/// Trimmed, non-empty value of a required field.
pub fn required(field: &str, value: Option<&str>) -> AppResult<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::Validation(format!("{field} is required")))
}

pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
        && !email.chars().any(char::is_whitespace)
}

pub fn is_valid_phone(phone: &str) -> bool {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    PHONE_DIGITS.contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}

pub fn check_email(email: &str) -> AppResult<()> {
    if is_valid_email(email) {
        Ok(())
    } else {
        Err(AppError::Validation("Invalid email address".into()))
    }
}

pub fn check_phone(phone: &str) -> AppResult<()> {
    if is_valid_phone(phone) {
        Ok(())
    } else {
        Err(AppError::Validation(
            "Phone number must have 8 to 15 digits".into(),
        ))
    }
}
