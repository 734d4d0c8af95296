//! Input checks run before anything is sent to the identity service

use crate::error::{AuthError, AuthResult};
use regex::Regex;
use std::sync::OnceLock;

pub const MIN_PASSWORD_LENGTH: usize = 6;

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is a valid regex")
    })
}

/// Normalize and check an email address
pub fn validate_email(email: &str) -> AuthResult<String> {
    let normalized = email.trim().to_lowercase();

    if normalized.is_empty() {
        return Err(AuthError::invalid_field("email", "Email is required"));
    }

    if !email_pattern().is_match(&normalized) {
        return Err(AuthError::invalid_field(
            "email",
            format!("Unable to validate email address: {}", email.trim()),
        ));
    }

    Ok(normalized)
}

pub fn validate_password(password: &str) -> AuthResult<()> {
    if password.is_empty() {
        return Err(AuthError::invalid_field("password", "Password is required"));
    }

    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::invalid_field(
            "password",
            format!(
                "Password should be at least {} characters",
                MIN_PASSWORD_LENGTH
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_normalization() {
        assert_eq!(validate_email("  A@X.com ").unwrap(), "a@x.com");
    }

    #[test]
    fn test_rejects_malformed_email() {
        for bad in ["", "plain", "a@b", "a b@x.com", "@x.com"] {
            let error = validate_email(bad).unwrap_err();
            assert!(
                matches!(error, AuthError::Validation { ref field, .. } if field.as_deref() == Some("email")),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_password_strength() {
        assert!(validate_password("secret").is_ok());
        assert!(validate_password("abc").is_err());
        assert!(validate_password("").is_err());
    }
}
