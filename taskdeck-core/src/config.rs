//! Configuration management

use crate::async_utils::RetryConfig;
use crate::config_error;
use crate::error::{CoreError, CoreResult, ErrorContext};
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for Taskdeck clients
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskdeckConfig {
    pub logging: LoggingConfig,
    pub backend: BackendConfig,
    pub store: StoreConfig,
}

/// Which identity backend to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process backend, optionally seeded from a TOML file
    Memory,
    /// Hosted auth + row API over HTTP
    Rest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Base URL of the hosted backend (rest only)
    pub url: Option<String>,
    /// Public API key sent with every request (rest only)
    pub api_key: Option<String>,
    /// Environment variable holding the API key when `api_key` is unset
    pub api_key_env: String,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Retry policy for idempotent reads
    pub retry: RetryConfig,
    /// Accounts, profiles and roles to preload (memory only)
    pub seed_file: Option<PathBuf>,
    /// Where the signed-in session is kept between runs (rest only)
    pub session_file: Option<PathBuf>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Memory,
            url: None,
            api_key: None,
            api_key_env: "TASKDECK_API_KEY".to_string(),
            request_timeout_ms: 10_000,
            retry: RetryConfig::default(),
            seed_file: None,
            session_file: None,
        }
    }
}

impl BackendConfig {
    /// Resolve the API key, falling back to the configured environment variable
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|key| !key.is_empty())
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|key| !key.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Capacity of the session-change notification channel
    pub notification_buffer: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            notification_buffer: 64,
        }
    }
}

impl TaskdeckConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let context = || {
            ErrorContext::new("config")
                .with_operation("load")
                .with_metadata("path", &path.display().to_string())
        };

        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::config_caused_by(
                format!("Failed to read {}", path.display()),
                e,
                context().with_suggestion("Run `taskdeck config --init` to create one"),
            )
        })?;

        toml::from_str(&content).map_err(|e| {
            CoreError::config_caused_by(
                format!("Failed to parse {}", path.display()),
                e,
                context().with_suggestion("Check the TOML syntax"),
            )
        })
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> CoreResult<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).map_err(|e| {
            CoreError::config_caused_by(
                "Failed to serialize configuration",
                e,
                ErrorContext::new("config").with_operation("save"),
            )
        })?;

        std::fs::write(path, content).map_err(|e| {
            CoreError::config_caused_by(
                format!("Failed to write {}", path.display()),
                e,
                ErrorContext::new("config")
                    .with_operation("save")
                    .with_suggestion("Check that the directory exists and is writable"),
            )
        })
    }

    /// Default lookup locations, most specific first
    pub fn default_paths() -> Vec<PathBuf> {
        [
            dirs::config_dir().map(|d| d.join("taskdeck").join("config.toml")),
            dirs::home_dir().map(|d| d.join(".taskdeck").join("config.toml")),
            Some(PathBuf::from("taskdeck.toml")),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Validate configuration
    pub fn validate(&self) -> CoreResult<()> {
        if self.backend.request_timeout_ms == 0 {
            return Err(config_error!(
                "validate",
                "backend.request_timeout_ms must be greater than 0"
            ));
        }

        if self.backend.retry.max_attempts == 0 {
            return Err(config_error!(
                "validate",
                "backend.retry.max_attempts must be at least 1",
                "Use max_attempts = 1 to disable retries"
            ));
        }

        if self.store.notification_buffer == 0 {
            return Err(config_error!(
                "validate",
                "store.notification_buffer must be greater than 0"
            ));
        }

        if self.backend.kind == BackendKind::Rest {
            let Some(raw) = self.backend.url.as_deref() else {
                return Err(config_error!(
                    "validate",
                    "backend.url is required for the rest backend",
                    "Set backend.url to the hosted project URL"
                ));
            };

            let parsed = url::Url::parse(raw).map_err(|e| {
                CoreError::config_caused_by(
                    format!("backend.url is not a valid URL: {}", raw),
                    e,
                    ErrorContext::new("config").with_operation("validate"),
                )
            })?;

            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(config_error!(
                    "validate",
                    format!("backend.url must use http or https, got {}", parsed.scheme())
                ));
            }
        }

        Ok(())
    }
}
