//! Integration tests for taskdeck-core infrastructure

use futures::FutureExt;
use std::time::Duration;
use tokio::time::sleep;
use taskdeck_core::{
    config_error, retry_async, with_timeout, BackendKind, CoreError, ErrorContext,
    LogFormat, RetryConfig, TaskdeckConfig,
};

#[test]
fn test_error_handling() {
    let error = config_error!("load", "Missing backend", "Run `taskdeck config --init`");

    match &error {
        CoreError::Config { message, context, .. } => {
            assert_eq!(message, "Missing backend");
            assert_eq!(context.component, "config");
            assert!(!context.error_id.is_empty());
        }
        _ => panic!("Expected Config error"),
    }

    // Should not panic without a subscriber
    error.log();

    assert!(!error.is_recoverable());
    assert_eq!(error.suggestions(), ["Run `taskdeck config --init`"]);

    let internal = CoreError::internal("lost state", "store");
    assert!(internal.suggestions().is_empty());
    assert_eq!(internal.context().map(|c| c.component.as_str()), Some("store"));

    let io: CoreError = std::io::Error::other("disk").into();
    assert!(io.context().is_none());
}

#[tokio::test]
async fn test_retry_mechanism() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let attempt_count = Arc::new(AtomicUsize::new(0));

    let operation = {
        let attempt_count = Arc::clone(&attempt_count);
        move || {
            let count = attempt_count.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if count < 3 {
                    Err(std::io::Error::other("Temporary failure"))
                } else {
                    Ok("Success")
                }
            }
            .boxed()
        }
    };

    let config = RetryConfig {
        max_attempts: 5,
        initial_delay_ms: 10,
        max_delay_ms: 100,
        backoff_multiplier: 2.0,
        jitter: false,
    };

    let result = retry_async(operation, &config, "test_operation", |_| true).await;
    assert_eq!(result.unwrap(), "Success");
    assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_timeout_mechanism() {
    let quick_operation = async {
        sleep(Duration::from_millis(10)).await;
        "Success"
    };

    let result = with_timeout(quick_operation, 500, "quick_test").await;
    assert_eq!(result.unwrap(), "Success");

    let slow_operation = async {
        sleep(Duration::from_millis(500)).await;
        "Should not reach here"
    };

    let result = with_timeout(slow_operation, 20, "slow_test").await;
    match result.unwrap_err() {
        CoreError::Timeout {
            operation,
            duration_ms,
            ..
        } => {
            assert_eq!(operation, "slow_test");
            assert_eq!(duration_ms, 20);
        }
        _ => panic!("Expected Timeout error"),
    }

    let error = with_timeout(sleep(Duration::from_millis(200)), 5, "slow_again")
        .await
        .unwrap_err();
    assert!(error.is_recoverable());
    assert_eq!(error.to_string(), "slow_again timed out after 5ms");
}

#[test]
fn test_config_validation() {
    let mut config = TaskdeckConfig::default();
    assert!(config.validate().is_ok());

    config.backend.request_timeout_ms = 0;
    match config.validate().unwrap_err() {
        CoreError::Config { message, .. } => {
            assert!(message.contains("request_timeout_ms"));
        }
        _ => panic!("Expected Config error"),
    }

    let mut config = TaskdeckConfig::default();
    config.backend.kind = BackendKind::Rest;
    assert!(config.validate().is_err(), "rest backend requires a url");

    config.backend.url = Some("not a url".to_string());
    assert!(config.validate().is_err());

    config.backend.url = Some("ftp://example.org".to_string());
    assert!(config.validate().is_err());

    config.backend.url = Some("https://project.example.org".to_string());
    assert!(config.validate().is_ok());

    let mut config = TaskdeckConfig::default();
    config.store.notification_buffer = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("taskdeck.toml");

    let mut config = TaskdeckConfig::default();
    config.logging.format = LogFormat::Json;
    config.backend.kind = BackendKind::Rest;
    config.backend.url = Some("https://project.example.org".to_string());
    config.save_to_file(&path).unwrap();

    let loaded = TaskdeckConfig::from_file(&path).unwrap();
    assert_eq!(loaded.logging.format, LogFormat::Json);
    assert_eq!(loaded.backend.kind, BackendKind::Rest);
    assert_eq!(
        loaded.backend.url.as_deref(),
        Some("https://project.example.org")
    );
}

#[test]
fn test_partial_config_uses_defaults() {
    let config: TaskdeckConfig = toml::from_str(
        r#"
        [backend]
        kind = "rest"
        url = "https://project.example.org"
        "#,
    )
    .unwrap();

    assert_eq!(config.backend.request_timeout_ms, 10_000);
    assert_eq!(config.store.notification_buffer, 64);
    assert_eq!(config.logging.level, "warn");
}

#[test]
fn test_missing_config_file() {
    let result = TaskdeckConfig::from_file("/nonexistent/taskdeck.toml");
    match result.unwrap_err() {
        CoreError::Config { context, .. } => {
            assert_eq!(context.operation.as_deref(), Some("load"));
            assert!(context.metadata.contains_key("path"));
        }
        _ => panic!("Expected Config error"),
    }
}

#[test]
fn test_error_context_builder() {
    let context = ErrorContext::new("store")
        .with_operation("authenticate")
        .with_metadata("email", "a@x.com")
        .with_suggestion("Retry later");

    assert_eq!(context.component, "store");
    assert_eq!(context.operation.as_deref(), Some("authenticate"));
    assert_eq!(context.metadata.get("email").map(String::as_str), Some("a@x.com"));
    assert_eq!(context.suggestions.len(), 1);
    assert!(context.to_string().starts_with("store::authenticate ["));
}

#[test]
fn test_api_key_resolution() {
    let mut config = TaskdeckConfig::default();
    config.backend.api_key = Some("inline-key".to_string());
    assert_eq!(config.backend.resolved_api_key().as_deref(), Some("inline-key"));

    config.backend.api_key = None;
    config.backend.api_key_env = "TASKDECK_TEST_UNSET_KEY_VAR".to_string();
    assert!(config.backend.resolved_api_key().is_none());
}
