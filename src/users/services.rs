use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ApiError;

pub const USERNAME_MAX: usize = 50;
pub const EMAIL_MAX: usize = 100;
pub const PASSWORD_MIN: usize = 6;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Trims the username and returns it if it fits the column.
pub fn normalize_username(raw: &str) -> Result<String, ApiError> {
    let username = raw.trim();
    if username.is_empty() {
        return Err(ApiError::Validation("Username is required".into()));
    }
    if username.chars().any(char::is_control) {
        return Err(ApiError::Validation(
            "Username must not contain control characters".into(),
        ));
    }
    if username.chars().count() > USERNAME_MAX {
        return Err(ApiError::Validation(format!(
            "Username must be at most {USERNAME_MAX} characters"
        )));
    }
    Ok(username.to_string())
}

/// Trims and lower-cases the email, then checks its shape and length.
pub fn normalize_email(raw: &str) -> Result<String, ApiError> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() {
        return Err(ApiError::Validation("Email is required".into()));
    }
    if email.chars().any(char::is_control) {
        return Err(ApiError::Validation(
            "Email must not contain control characters".into(),
        ));
    }
    if email.chars().count() > EMAIL_MAX {
        return Err(ApiError::Validation(format!(
            "Email must be at most {EMAIL_MAX} characters"
        )));
    }
    if !is_valid_email(&email) {
        return Err(ApiError::Validation("Invalid email".into()));
    }
    Ok(email)
}

pub fn check_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < PASSWORD_MIN {
        return Err(ApiError::Validation(format!(
            "Password must be at least {PASSWORD_MIN} characters"
        )));
    }
    Ok(())
}

/// Parses the `:id` path segment.
pub fn parse_user_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse::<i64>()
        .map_err(|_| ApiError::Validation("Invalid user ID".into()))
}
