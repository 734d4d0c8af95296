//! Errors shared across the workspace
//!
//! [`CoreError`] covers infrastructure failures: configuration, timeouts, io.
//! Domain crates wrap it in their own error types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

pub type CoreResult<T> = Result<T, CoreError>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Where an error happened and what can be done about it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Correlates the log line with what the user saw
    pub error_id: String,
    pub timestamp: DateTime<Utc>,
    pub component: String,
    pub operation: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub suggestions: Vec<String>,
}

impl ErrorContext {
    pub fn new(component: &str) -> Self {
        Self {
            error_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            component: component.to_string(),
            operation: None,
            metadata: BTreeMap::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.suggestions.push(suggestion.to_string());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.operation {
            Some(operation) => write!(f, "{}::{} [{}]", self.component, operation, self.error_id),
            None => write!(f, "{} [{}]", self.component, self.error_id),
        }
    }
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<BoxError>,
        context: ErrorContext,
    },

    #[error("{operation} timed out after {duration_ms}ms")]
    Timeout {
        operation: String,
        duration_ms: u64,
        context: ErrorContext,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        context: ErrorContext,
    },
}

impl CoreError {
    pub fn config<S: Into<String>>(message: S, context: ErrorContext) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
            context,
        }
    }

    /// Configuration error wrapping the failure that caused it
    pub fn config_caused_by<S, E>(message: S, source: E, context: ErrorContext) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
            context,
        }
    }

    pub fn internal<S: Into<String>>(message: S, component: &str) -> Self {
        Self::Internal {
            message: message.into(),
            context: ErrorContext::new(component),
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::Config { context, .. }
            | Self::Timeout { context, .. }
            | Self::Internal { context, .. } => Some(context),
            Self::Io(_) | Self::Serialization(_) => None,
        }
    }

    /// Whether retrying the same call may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn suggestions(&self) -> &[String] {
        self.context()
            .map(|context| context.suggestions.as_slice())
            .unwrap_or_default()
    }

    /// Emit the error once, at a level matching its severity
    pub fn log(&self) {
        let location = self.context().map(ToString::to_string);
        let suggestions = self.suggestions().join("; ");

        if self.is_recoverable() {
            warn!(location = ?location, error = %self, "Recoverable failure");
        } else {
            error!(location = ?location, error = %self, suggestions, "Operation failed");
        }
    }
}

/// Configuration error raised by the `config` component
#[macro_export]
macro_rules! config_error {
    ($operation:expr, $msg:expr) => {
        $crate::CoreError::config(
            $msg,
            $crate::ErrorContext::new("config").with_operation($operation),
        )
    };
    ($operation:expr, $msg:expr, $suggestion:expr) => {
        $crate::CoreError::config(
            $msg,
            $crate::ErrorContext::new("config")
                .with_operation($operation)
                .with_suggestion($suggestion),
        )
    };
}
