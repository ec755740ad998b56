//! Input checks for credentials supplied by callers.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const PASSWORD_MIN_LEN: usize = 8;
pub const PASSWORD_MAX_LEN: usize = 128;
const EMAIL_MAX_LEN: usize = 254;

static EMAIL_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    #[must_use]
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Basic email format check.
#[must_use]
pub fn valid_email(email: &str) -> bool {
    EMAIL_RE
        .as_ref()
        .is_some_and(|regex| regex.is_match(email))
}

/// Upper, lower, digit and a punctuation or symbol character.
#[must_use]
pub fn valid_password_charset(password: &str) -> bool {
    let mut has_lower = false;
    let mut has_upper = false;
    let mut has_number = false;
    let mut has_special = false;
    for c in password.chars() {
        if c.is_lowercase() {
            has_lower = true;
        } else if c.is_uppercase() {
            has_upper = true;
        } else if c.is_numeric() {
            has_number = true;
        } else if !c.is_alphanumeric() && !c.is_whitespace() && !c.is_control() {
            has_special = true;
        }
    }
    has_lower && has_upper && has_number && has_special
}

fn check_email(email: &str, errors: &mut Vec<FieldError>) {
    if email.is_empty() {
        errors.push(FieldError::new("email", "email is required"));
    } else if email.len() > EMAIL_MAX_LEN || !valid_email(email) {
        errors.push(FieldError::new("email", "invalid email format"));
    }
}

fn check_password(password: &str, errors: &mut Vec<FieldError>) {
    let len = password.chars().count();
    if password.is_empty() {
        errors.push(FieldError::new("password", "password is required"));
    } else if len < PASSWORD_MIN_LEN {
        errors.push(FieldError::new(
            "password",
            format!("password must be at least {PASSWORD_MIN_LEN} characters long"),
        ));
    } else if len > PASSWORD_MAX_LEN {
        errors.push(FieldError::new(
            "password",
            format!("password must not exceed {PASSWORD_MAX_LEN} characters"),
        ));
    } else if !valid_password_charset(password) {
        errors.push(FieldError::new(
            "password",
            "password must contain at least one uppercase letter, one lowercase letter, one number, and one special character",
        ));
    }
}

/// Checks applied on registration.
#[must_use]
pub fn validate_registration(email: &str, password: &str) -> Vec<FieldError> {
    let mut errors = Vec::new();
    check_email(email, &mut errors);
    check_password(password, &mut errors);
    errors
}

/// Login only requires both fields; the password rules may have changed since
/// the account was created.
#[must_use]
pub fn validate_login(email: &str, password: &str) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if email.is_empty() {
        errors.push(FieldError::new("email", "email is required"));
    }
    if password.is_empty() {
        errors.push(FieldError::new("password", "password is required"));
    }
    errors
}

/// Partial update: only present fields are checked.
#[must_use]
pub fn validate_update(email: Option<&str>, password: Option<&str>) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if let Some(email) = email {
        check_email(email, &mut errors);
    }
    if let Some(password) = password {
        check_password(password, &mut errors);
    }
    errors
}
