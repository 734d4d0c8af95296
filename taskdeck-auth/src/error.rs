//! Authentication error types
//!
//! Every failure the store or an identity service can report is one of these
//! kinds, each carrying a human-readable reason for the caller to display.

use crate::model::Role;
use serde::{Deserialize, Serialize};
use taskdeck_core::CoreError;
use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "error_type", content = "details")]
pub enum AuthError {
    /// Bad input, e.g. a malformed email or a weak password
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// Invalid credentials, locked account or expired session
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    /// Role-restricted action attempted with an insufficient role
    #[error("Not authorized: {message}")]
    Authorization {
        message: String,
        required: Option<Role>,
    },

    /// Identity service unreachable or failing
    #[error("Network error: {message}")]
    Network { message: String, retryable: bool },

    /// Operation requires an active session but none exists
    #[error("Not authenticated: {operation} requires an active session")]
    NotAuthenticated { operation: String },

    /// Startup misconfiguration
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A backend record that could not be decoded
    #[error("Malformed {table} record: {message}")]
    Record { table: String, message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Discriminant for callers that branch on the failure kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthErrorKind {
    Validation,
    Auth,
    Authorization,
    Network,
    NotAuthenticated,
    Config,
    Record,
    Internal,
}

impl AuthError {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    pub fn invalid_field<F: Into<String>, S: Into<String>>(field: F, message: S) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn auth<S: Into<String>>(message: S) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    pub fn forbidden<S: Into<String>>(message: S) -> Self {
        Self::Authorization {
            message: message.into(),
            required: None,
        }
    }

    pub fn requires_role<S: Into<String>>(operation: S, required: Role) -> Self {
        Self::Authorization {
            message: format!("{} requires the {} role", operation.into(), required),
            required: Some(required),
        }
    }

    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn not_authenticated<S: Into<String>>(operation: S) -> Self {
        Self::NotAuthenticated {
            operation: operation.into(),
        }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn record<S: Into<String>>(table: impl std::fmt::Display, message: S) -> Self {
        Self::Record {
            table: table.to_string(),
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> AuthErrorKind {
        match self {
            Self::Validation { .. } => AuthErrorKind::Validation,
            Self::Auth { .. } => AuthErrorKind::Auth,
            Self::Authorization { .. } => AuthErrorKind::Authorization,
            Self::Network { .. } => AuthErrorKind::Network,
            Self::NotAuthenticated { .. } => AuthErrorKind::NotAuthenticated,
            Self::Config { .. } => AuthErrorKind::Config,
            Self::Record { .. } => AuthErrorKind::Record,
            Self::Internal { .. } => AuthErrorKind::Internal,
        }
    }

    /// Whether retrying the same call may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Network { retryable: true, .. })
    }

    /// Message suitable for showing to an end user
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation { message, .. } | Self::Auth { message } => message.clone(),
            Self::Authorization { message, .. } => {
                format!("You don't have permission for this: {}", message)
            }
            Self::Network { .. } => {
                "Could not reach the server. Check your connection and try again.".to_string()
            }
            Self::NotAuthenticated { .. } => "Please sign in to continue.".to_string(),
            Self::Config { .. } | Self::Record { .. } | Self::Internal { .. } => {
                "Something went wrong. Please try again later.".to_string()
            }
        }
    }
}

impl From<CoreError> for AuthError {
    fn from(error: CoreError) -> Self {
        match &error {
            CoreError::Timeout { .. } => Self::Network {
                message: error.to_string(),
                retryable: true,
            },
            CoreError::Config { .. } => Self::Config {
                message: error.to_string(),
            },
            CoreError::Serialization(_) | CoreError::Io(_) | CoreError::Internal { .. } => {
                Self::Internal {
                    message: error.to_string(),
                }
            }
        }
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::internal(format!("JSON error: {}", error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskdeck_core::ErrorContext;

    #[test]
    fn test_error_recoverability() {
        assert!(AuthError::network("connection reset").is_recoverable());
        assert!(!AuthError::auth("Invalid login credentials").is_recoverable());
        assert!(!AuthError::not_authenticated("invite_member").is_recoverable());
    }

    #[test]
    fn test_core_error_mapping() {
        let timeout = CoreError::Timeout {
            operation: "authenticate".to_string(),
            duration_ms: 50,
            context: ErrorContext::new("test"),
        };
        assert_eq!(AuthError::from(timeout).kind(), AuthErrorKind::Network);

        let config = CoreError::config("bad", ErrorContext::new("test"));
        assert_eq!(AuthError::from(config).kind(), AuthErrorKind::Config);
    }

    #[test]
    fn test_user_messages() {
        let error = AuthError::requires_role("grant_role", Role::Admin);
        assert!(error.user_message().contains("admin"));

        let error = AuthError::invalid_field("email", "Unable to validate email address");
        assert_eq!(error.user_message(), "Unable to validate email address");
    }

    #[test]
    fn test_serialized_shape() {
        let error = AuthError::not_authenticated("refresh");
        let value = serde_json::to_value(&error).unwrap();
        assert_eq!(value["error_type"], "NotAuthenticated");
        assert_eq!(value["details"]["operation"], "refresh");
    }
}
