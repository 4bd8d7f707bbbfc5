//! Input validation utilities.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{ServiceError, ServiceResult};

static EMAIL: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").ok());

static USERNAME: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9._@+-]+$").ok());

static ROLE_CODE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").ok());

fn invalid(message: impl Into<String>) -> ServiceError {
    ServiceError::InvalidInput(message.into())
}

fn pattern_matches(pattern: &Lazy<Option<Regex>>, value: &str) -> ServiceResult<bool> {
    pattern
        .as_ref()
        .map(|regex| regex.is_match(value))
        .ok_or_else(|| invalid("validation pattern failed to compile"))
}

pub fn validate_email(email: &str) -> ServiceResult<()> {
    if email.len() > 255 {
        return Err(invalid("email too long"));
    }
    if !pattern_matches(&EMAIL, email)? {
        return Err(invalid(format!("invalid email format: {email}")));
    }
    Ok(())
}

/// Usernames may be plain handles or email addresses.
pub fn validate_username(username: &str) -> ServiceResult<()> {
    if username.len() < 3 {
        return Err(invalid("username must be at least 3 characters long"));
    }
    if username.len() > 255 {
        return Err(invalid("username too long"));
    }
    if !pattern_matches(&USERNAME, username)? {
        return Err(invalid(
            "username can only contain letters, numbers and . _ @ + -",
        ));
    }
    Ok(())
}

/// Password policy is enforced by the identity provider; only reject blanks here.
pub fn validate_password(password: &str) -> ServiceResult<()> {
    if password.trim().is_empty() {
        return Err(invalid("password cannot be empty"));
    }
    if password.len() > 128 {
        return Err(invalid("password must be less than 128 characters long"));
    }
    Ok(())
}

pub fn validate_display_name(display_name: &str) -> ServiceResult<()> {
    if display_name.trim().is_empty() {
        return Err(invalid("display name cannot be empty"));
    }
    if display_name.chars().count() > 100 {
        return Err(invalid("display name must be at most 100 characters long"));
    }
    if display_name.chars().any(|c| matches!(c, '\n' | '\r' | '\t' | '\0')) {
        return Err(invalid("display name contains invalid characters"));
    }
    Ok(())
}

/// Trim and upper-case a role code, then check its shape.
pub fn normalize_role_code(code: &str) -> ServiceResult<String> {
    let normalized = code.trim().to_uppercase();
    if normalized.is_empty() || normalized.len() > 50 {
        return Err(invalid("role code must be between 1 and 50 characters"));
    }
    if !pattern_matches(&ROLE_CODE, &normalized)? {
        return Err(invalid(format!(
            "role code {normalized} may only contain letters, digits and underscores"
        )));
    }
    Ok(normalized)
}
