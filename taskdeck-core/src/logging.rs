//! Structured logging setup
//!
//! Logs go to stderr (or a file) so command output on stdout stays clean.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level; `RUST_LOG` overrides it when set
    pub level: String,
    pub format: LogFormat,
    /// Include source file and line
    pub location: bool,
    /// Include thread ids and names
    pub threads: bool,
    /// Append to this file instead of writing to stderr
    pub file: Option<PathBuf>,
    /// Log span close events with busy/idle timings
    pub span_timing: bool,
    /// Extra `target=level` directives
    pub directives: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Compact,
            location: false,
            threads: false,
            file: None,
            span_timing: false,
            directives: vec!["taskdeck_auth=info".to_string()],
        }
    }
}

impl LoggingConfig {
    fn filter(&self) -> Result<EnvFilter, tracing_subscriber::filter::ParseError> {
        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));
        for directive in &self.directives {
            filter = filter.add_directive(directive.parse()?);
        }
        Ok(filter)
    }

    fn writer(&self) -> std::io::Result<BoxMakeWriter> {
        Ok(match &self.file {
            Some(path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                BoxMakeWriter::new(Mutex::new(file))
            }
            None => BoxMakeWriter::new(std::io::stderr),
        })
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(
    config: &LoggingConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = config.filter()?;

    let layer = fmt::layer()
        .with_writer(config.writer()?)
        .with_ansi(config.file.is_none())
        .with_span_events(if config.span_timing {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        })
        .with_file(config.location)
        .with_line_number(config.location)
        .with_thread_ids(config.threads)
        .with_thread_names(config.threads);

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()?;

    Ok(())
}

/// `info` event marking the start of a named operation
#[macro_export]
macro_rules! log_operation_start {
    ($operation:expr $(, $($field:tt)+)?) => {
        $crate::tracing::info!(operation = $operation, $($($field)+,)? "started")
    };
}

#[macro_export]
macro_rules! log_operation_success {
    ($operation:expr $(, $($field:tt)+)?) => {
        $crate::tracing::info!(operation = $operation, $($($field)+,)? "succeeded")
    };
}

/// `warn` event for a failed operation; `$error` is recorded with `Display`
#[macro_export]
macro_rules! log_operation_error {
    ($operation:expr, $error:expr $(, $($field:tt)+)?) => {
        $crate::tracing::warn!(
            operation = $operation,
            error = %$error,
            $($($field)+,)?
            "failed"
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_parse_into_a_filter() {
        let config = LoggingConfig::default();
        assert!(config.filter().is_ok());
        assert_eq!(config.format, LogFormat::Compact);
    }

    #[test]
    fn test_bad_directive_is_rejected() {
        let config = LoggingConfig {
            directives: vec!["taskdeck_auth=loud".to_string()],
            ..LoggingConfig::default()
        };
        assert!(config.filter().is_err());
        assert!(init_logging(&config).is_err());
    }

    #[test]
    fn test_file_writer_creates_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskdeck.log");
        let config = LoggingConfig {
            file: Some(path.clone()),
            ..LoggingConfig::default()
        };

        assert!(config.writer().is_ok());
        assert!(path.exists());
    }

    #[test]
    fn test_format_names() {
        let config: LoggingConfig = toml::from_str("format = \"json\"\nlevel = \"debug\"").unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "debug");
        assert!(config.file.is_none());
    }
}
