//! Identity service backed by a hosted auth + row API over HTTP

use crate::error::{AuthError, AuthResult};
use crate::model::{Identity, Metadata, RecordTable, Role, Session, SessionChange};
use crate::service::{IdentityService, SessionSubscription};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use taskdeck_core::{retry_async, with_timeout, BackendConfig, BackendKind, RetryConfig};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use url::Url;

/// Connection settings resolved from [`BackendConfig`]
#[derive(Debug, Clone)]
pub struct RestClientConfig {
    pub base_url: Url,
    pub api_key: String,
    pub request_timeout_ms: u64,
    pub retry: RetryConfig,
    pub session_file: Option<PathBuf>,
    pub notification_buffer: usize,
}

impl RestClientConfig {
    pub fn from_backend(backend: &BackendConfig, notification_buffer: usize) -> AuthResult<Self> {
        if backend.kind != BackendKind::Rest {
            return Err(AuthError::config("backend.kind must be \"rest\""));
        }

        let raw_url = backend
            .url
            .as_deref()
            .ok_or_else(|| AuthError::config("backend.url is required for the rest backend"))?;
        let base_url = Url::parse(raw_url)
            .map_err(|e| AuthError::config(format!("Invalid backend.url '{}': {}", raw_url, e)))?;

        let api_key = backend.resolved_api_key().ok_or_else(|| {
            AuthError::config(format!(
                "No API key: set backend.api_key or the {} environment variable",
                backend.api_key_env
            ))
        })?;

        Ok(Self {
            base_url,
            api_key,
            request_timeout_ms: backend.request_timeout_ms,
            retry: backend.retry.clone(),
            session_file: backend.session_file.clone(),
            notification_buffer,
        })
    }

    fn endpoint(&self, path: &str) -> AuthResult<Url> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let dir = format!("{}/", base.path());
            base.set_path(&dir);
        }
        base.join(path.trim_start_matches('/'))
            .map_err(|e| AuthError::config(format!("Invalid endpoint {}: {}", path, e)))
    }

    /// Row lookup URL: `/rest/v1/{table}?{column}=eq.{id}`
    fn record_url(&self, table: RecordTable, identity_id: &str) -> AuthResult<Url> {
        let mut url = self.endpoint(&format!("rest/v1/{}", table.as_str()))?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair(table.identity_column(), &format!("eq.{}", identity_id));
        Ok(url)
    }
}

pub struct RestIdentityService {
    client: reqwest::Client,
    config: RestClientConfig,
    session: RwLock<Option<Session>>,
    changes: broadcast::Sender<SessionChange>,
}

/// Token grant / signup response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: UserResponse,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: Metadata,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or_else(|| {
                Utc::now() + chrono::Duration::seconds(self.expires_in.unwrap_or(3600))
            });

        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            identity: Identity {
                id: self.user.id,
                email: self.user.email.unwrap_or_default(),
                metadata: self.user.user_metadata,
                created_at: self.user.created_at.unwrap_or_else(Utc::now),
            },
        }
    }
}

impl RestIdentityService {
    pub fn new(config: RestClientConfig) -> AuthResult<Self> {
        let client = create_http_client(&config)?;
        let (changes, _) = broadcast::channel(config.notification_buffer.max(1));
        let session = config
            .session_file
            .as_ref()
            .and_then(|path| load_session_file(path));

        info!(base_url = %config.base_url, restored = session.is_some(), "Created REST identity service");

        Ok(Self {
            client,
            config,
            session: RwLock::new(session),
            changes,
        })
    }

    /// Exchange the refresh token for a new session
    pub async fn refresh_session(&self) -> AuthResult<Session> {
        let refresh_token = self
            .session
            .read()
            .await
            .as_ref()
            .map(|session| session.refresh_token.clone())
            .ok_or_else(|| AuthError::not_authenticated("refresh_session"))?;

        let session = self
            .token_grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await?;

        self.store_session(Some(session.clone())).await;
        self.notify(SessionChange::refreshed(session.clone()));
        Ok(session)
    }

    fn notify(&self, change: SessionChange) {
        let _ = self.changes.send(change);
    }

    async fn store_session(&self, session: Option<Session>) {
        if let Some(path) = &self.config.session_file {
            persist_session_file(path, session.as_ref());
        }
        *self.session.write().await = session;
    }

    /// Bearer token for row requests: the session's, or the public key
    async fn bearer(&self) -> String {
        match self.session.read().await.as_ref() {
            Some(session) => session.access_token.clone(),
            None => self.config.api_key.clone(),
        }
    }

    fn request(&self, method: Method, url: Url, bearer: &str) -> AuthResult<reqwest::RequestBuilder> {
        let value = HeaderValue::from_str(&format!("Bearer {}", bearer))
            .map_err(|e| AuthError::config(format!("Invalid access token header: {}", e)))?;
        Ok(self.client.request(method, url).header(AUTHORIZATION, value))
    }

    async fn token_grant(&self, grant_type: &str, body: serde_json::Value) -> AuthResult<Session> {
        let mut url = self.config.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);

        let request = self
            .request(Method::POST, url, &self.config.api_key)?
            .json(&body);
        let response = execute(request, self.config.request_timeout_ms, grant_type, true).await?;

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::network(format!("Malformed token response: {}", e)))?;
        Ok(token.into_session())
    }
}

#[async_trait]
impl IdentityService for RestIdentityService {
    async fn register(&self, email: &str, password: &str, metadata: Metadata) -> AuthResult<()> {
        let url = self.config.endpoint("auth/v1/signup")?;
        let request = self
            .request(Method::POST, url, &self.config.api_key)?
            .json(&json!({ "email": email, "password": password, "data": metadata }));
        let response = execute(request, self.config.request_timeout_ms, "signup", false).await?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AuthError::network(format!("Malformed signup response: {}", e)))?;

        // Without an access token the account awaits email confirmation.
        if body.get("access_token").is_none() {
            info!(email, "Account created, confirmation pending");
            return Ok(());
        }

        let token: TokenResponse = serde_json::from_value(body)?;
        let session = token.into_session();
        self.store_session(Some(session.clone())).await;
        self.notify(SessionChange::signed_in(session));
        Ok(())
    }

    async fn authenticate(&self, email: &str, password: &str) -> AuthResult<()> {
        let session = self
            .token_grant("password", json!({ "email": email, "password": password }))
            .await?;

        debug!(identity_id = %session.identity.id, "Signed in");
        self.store_session(Some(session.clone())).await;
        self.notify(SessionChange::signed_in(session));
        Ok(())
    }

    async fn terminate(&self) -> AuthResult<()> {
        let access_token = match self.session.read().await.as_ref() {
            Some(session) => session.access_token.clone(),
            None => return Ok(()),
        };

        let url = self.config.endpoint("auth/v1/logout")?;
        let request = self.request(Method::POST, url, &access_token)?;
        match execute(request, self.config.request_timeout_ms, "logout", false).await {
            Ok(_) => {}
            // The token is already dead server-side; finish signing out locally.
            Err(AuthError::Auth { .. }) => debug!("Session already invalid at logout"),
            Err(e) => return Err(e),
        }

        self.store_session(None).await;
        self.notify(SessionChange::signed_out());
        Ok(())
    }

    async fn current_session(&self) -> AuthResult<Option<Session>> {
        let session = self.session.read().await.clone();
        match session {
            Some(session) if session.is_expired() => match self.refresh_session().await {
                Ok(session) => Ok(Some(session)),
                Err(e) if e.is_recoverable() => Err(e),
                Err(e) => {
                    warn!(error = %e, "Stored session could not be refreshed");
                    self.store_session(None).await;
                    self.notify(SessionChange::expired());
                    Ok(None)
                }
            },
            other => Ok(other),
        }
    }

    fn on_session_change(&self) -> AuthResult<SessionSubscription> {
        Ok(SessionSubscription::new(self.changes.subscribe()))
    }

    async fn fetch_record(
        &self,
        table: RecordTable,
        identity_id: &str,
    ) -> AuthResult<serde_json::Value> {
        let url = self.config.record_url(table, identity_id)?;
        let request = self.request(Method::GET, url, &self.bearer().await)?;
        let timeout_ms = self.config.request_timeout_ms;

        let rows: serde_json::Value = retry_async(
            move || {
                let request = request.try_clone();
                async move {
                    let request =
                        request.ok_or_else(|| AuthError::internal("request is not cloneable"))?;
                    let response = execute(request, timeout_ms, "fetch_record", false).await?;
                    response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| AuthError::network(format!("Malformed row response: {}", e)))
                }
                .boxed()
            },
            &self.config.retry,
            "fetch_record",
            AuthError::is_recoverable,
        )
        .await?;

        match table {
            RecordTable::Profiles => Ok(match rows {
                serde_json::Value::Array(rows) => {
                    rows.into_iter().next().unwrap_or(serde_json::Value::Null)
                }
                other => other,
            }),
            RecordTable::Roles => Ok(rows),
        }
    }

    async fn assign_role(&self, identity_id: &str, role: Role) -> AuthResult<()> {
        let url = self.config.endpoint(&format!("rest/v1/{}", RecordTable::Roles.as_str()))?;
        let request = self
            .request(Method::POST, url, &self.bearer().await)?
            .header("Prefer", "return=minimal")
            .json(&json!({ "user_id": identity_id, "role": role }));

        match execute(request, self.config.request_timeout_ms, "assign_role", false).await {
            Ok(_) => Ok(()),
            // Unique (user_id, role): the assignment already exists.
            Err(AuthError::Validation { message, .. }) if message.contains("duplicate") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn remove_role(&self, identity_id: &str, role: Role) -> AuthResult<()> {
        let mut url = self.config.endpoint(&format!("rest/v1/{}", RecordTable::Roles.as_str()))?;
        url.query_pairs_mut()
            .append_pair(
                RecordTable::Roles.identity_column(),
                &format!("eq.{}", identity_id),
            )
            .append_pair("role", &format!("eq.{}", role));

        let request = self.request(Method::DELETE, url, &self.bearer().await)?;
        execute(request, self.config.request_timeout_ms, "remove_role", false).await?;
        Ok(())
    }
}

fn create_http_client(config: &RestClientConfig) -> AuthResult<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        "apikey",
        HeaderValue::from_str(&config.api_key)
            .map_err(|e| AuthError::config(format!("Invalid API key: {}", e)))?,
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    reqwest::Client::builder()
        .user_agent(concat!("taskdeck/", env!("CARGO_PKG_VERSION")))
        .default_headers(headers)
        .build()
        .map_err(|e| AuthError::config(format!("Failed to create HTTP client: {}", e)))
}

/// Send `request` under a timeout and turn failure statuses into errors
async fn execute(
    request: reqwest::RequestBuilder,
    timeout_ms: u64,
    operation: &str,
    token_grant: bool,
) -> AuthResult<reqwest::Response> {
    let response = with_timeout(request.send(), timeout_ms, operation)
        .await?
        .map_err(|e| AuthError::network(format!("{} request failed: {}", operation, e)))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown error").to_string());

    debug!(operation, status = status.as_u16(), %message, "Request rejected");
    Err(map_status(status, message, token_grant))
}

/// Map an HTTP failure status to an error kind
fn map_status(status: StatusCode, message: String, token_grant: bool) -> AuthError {
    match status.as_u16() {
        // Token grants report bad credentials as 400.
        400 | 422 if token_grant => AuthError::auth(message),
        400 | 409 | 422 => AuthError::validation(message),
        401 => AuthError::auth(message),
        403 => AuthError::forbidden(message),
        404 => AuthError::config(format!("Endpoint not found ({}); check backend.url", message)),
        408 | 429 => AuthError::network(message),
        500..=599 => AuthError::network(format!("Server error {}: {}", status.as_u16(), message)),
        other => AuthError::internal(format!("Unexpected status {}: {}", other, message)),
    }
}

/// Pull a readable message out of an error body
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
}

fn load_session_file(path: &Path) -> Option<Session> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(session) => Some(session),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable session file");
            None
        }
    }
}

fn persist_session_file(path: &Path, session: Option<&Session>) {
    let result = match session {
        Some(session) => serde_json::to_string_pretty(session)
            .map_err(std::io::Error::other)
            .and_then(|content| {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, content)
            }),
        None => match std::fs::remove_file(path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        },
    };

    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "Failed to persist session");
    }
}
