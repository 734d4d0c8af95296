//! In-process identity service
//!
//! Keeps accounts, the current session, profiles and role rows in memory and
//! broadcasts session transitions. Used by the CLI's `memory` backend and by
//! tests, which can inject failures and slow down record fetches.

use crate::error::{AuthError, AuthResult};
use crate::model::{
    Identity, Metadata, Profile, RecordTable, Role, RoleAssignment, Session, SessionChange,
};
use crate::service::{IdentityService, SessionSubscription};
use crate::validation::{validate_email, validate_password};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const DEFAULT_NOTIFICATION_BUFFER: usize = 64;

/// Operations that can be made to fail on demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceOperation {
    Register,
    Authenticate,
    Terminate,
    CurrentSession,
    FetchRecord,
    AssignRole,
    RemoveRole,
}

/// Accounts to preload, usually read from a TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub accounts: Vec<SeedAccount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedAccount {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    /// Defaults to `["user"]` when empty
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub locked: bool,
}

impl SeedAccount {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            first_name: None,
            last_name: None,
            phone: None,
            category: None,
            roles: Vec::new(),
            locked: false,
        }
    }

    pub fn with_name(mut self, first_name: &str, last_name: &str) -> Self {
        self.first_name = Some(first_name.to_string());
        self.last_name = Some(last_name.to_string());
        self
    }

    pub fn with_roles(mut self, roles: &[Role]) -> Self {
        self.roles = roles.to_vec();
        self
    }
}

struct Account {
    identity: Identity,
    password_hash: String,
    locked: bool,
}

#[derive(Default)]
struct Directory {
    /// Keyed by normalized email
    accounts: HashMap<String, Account>,
    current: Option<Session>,
    profiles: HashMap<String, Profile>,
    roles: Vec<RoleAssignment>,
}

#[derive(Default)]
struct Faults {
    pending: HashMap<ServiceOperation, VecDeque<AuthError>>,
    fetch_delays: HashMap<String, Duration>,
}

pub struct InMemoryIdentityService {
    directory: RwLock<Directory>,
    changes: broadcast::Sender<SessionChange>,
    session_ttl: chrono::Duration,
    faults: Mutex<Faults>,
    notifications_enabled: AtomicBool,
}

impl InMemoryIdentityService {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_NOTIFICATION_BUFFER)
    }

    /// Create a service whose notification channel buffers `capacity` changes
    pub fn with_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            directory: RwLock::new(Directory::default()),
            changes,
            session_ttl: chrono::Duration::hours(1),
            faults: Mutex::new(Faults::default()),
            notifications_enabled: AtomicBool::new(true),
        }
    }

    pub fn with_session_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Build a service preloaded with `seed`
    pub fn from_seed(seed: SeedData, capacity: usize) -> AuthResult<Self> {
        let service = Self::with_capacity(capacity);
        for account in seed.accounts {
            service.add_account(account)?;
        }
        Ok(service)
    }

    /// Build a service preloaded from a TOML seed file
    pub fn from_seed_file<P: AsRef<Path>>(path: P, capacity: usize) -> AuthResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AuthError::config(format!("Failed to read seed file {}: {}", path.display(), e))
        })?;
        let seed: SeedData = toml::from_str(&content).map_err(|e| {
            AuthError::config(format!("Failed to parse seed file {}: {}", path.display(), e))
        })?;

        info!(accounts = seed.accounts.len(), path = %path.display(), "Loading seed accounts");
        Self::from_seed(seed, capacity)
    }

    /// Create an account with its profile and roles, without signing in
    pub fn add_account(&self, seed: SeedAccount) -> AuthResult<Identity> {
        let email = validate_email(&seed.email)?;
        validate_password(&seed.password)?;

        let mut metadata = Metadata::new();
        if let Some(first_name) = &seed.first_name {
            metadata.insert("first_name".to_string(), first_name.clone().into());
        }
        if let Some(last_name) = &seed.last_name {
            metadata.insert("last_name".to_string(), last_name.clone().into());
        }

        let identity = self.create_account(&email, &seed.password, metadata)?;

        let mut directory = self.write_directory();
        if let Some(account) = directory.accounts.get_mut(&email) {
            account.locked = seed.locked;
        }
        if let Some(profile) = directory.profiles.get_mut(&identity.id) {
            profile.phone = seed.phone;
            profile.category = seed.category;
        }
        if !seed.roles.is_empty() {
            directory.roles.retain(|row| row.identity_id != identity.id);
            for role in seed.roles {
                directory.roles.push(RoleAssignment::new(identity.id.clone(), role));
            }
        }

        Ok(identity)
    }

    /// Refuse future sign-ins for `email`
    pub fn lock_account(&self, email: &str) -> AuthResult<()> {
        let email = validate_email(email)?;
        let mut directory = self.write_directory();
        let account = directory
            .accounts
            .get_mut(&email)
            .ok_or_else(|| AuthError::invalid_field("email", "No account for this email"))?;
        account.locked = true;
        Ok(())
    }

    /// Issue fresh tokens for the current session
    pub fn refresh_session(&self) -> AuthResult<Session> {
        let session = {
            let mut directory = self.write_directory();
            let current = directory
                .current
                .as_ref()
                .ok_or_else(|| AuthError::not_authenticated("refresh_session"))?;
            let refreshed = self.issue_session(current.identity.clone());
            directory.current = Some(refreshed.clone());
            refreshed
        };

        debug!(identity_id = %session.identity.id, "Session refreshed");
        self.notify(SessionChange::refreshed(session.clone()));
        Ok(session)
    }

    /// Invalidate the current session from the service side
    pub fn expire_session(&self) {
        let had_session = self.write_directory().current.take().is_some();
        if had_session {
            self.notify(SessionChange::expired());
        }
    }

    /// The session as the service sees it, without fault injection
    pub fn active_session(&self) -> Option<Session> {
        self.read_directory().current.clone()
    }

    /// Make the next call to `operation` fail with `error`
    pub fn fail_next(&self, operation: ServiceOperation, error: AuthError) {
        self.lock_faults()
            .pending
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Delay every record fetch for `identity_id`
    pub fn set_fetch_delay(&self, identity_id: &str, delay: Duration) {
        self.lock_faults()
            .fetch_delays
            .insert(identity_id.to_string(), delay);
    }

    /// Make `on_session_change` fail, as if the channel were unavailable
    pub fn disable_notifications(&self) {
        self.notifications_enabled.store(false, Ordering::SeqCst);
    }

    fn read_directory(&self) -> RwLockReadGuard<'_, Directory> {
        self.directory
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_directory(&self) -> RwLockWriteGuard<'_, Directory> {
        self.directory
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_fault(&self, operation: ServiceOperation) -> AuthResult<()> {
        match self
            .lock_faults()
            .pending
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn notify(&self, change: SessionChange) {
        // No receivers is fine: nobody is listening yet.
        let _ = self.changes.send(change);
    }

    fn issue_session(&self, identity: Identity) -> Session {
        Session {
            access_token: uuid::Uuid::new_v4().to_string(),
            refresh_token: uuid::Uuid::new_v4().to_string(),
            expires_at: Utc::now() + self.session_ttl,
            identity,
        }
    }

    fn create_account(&self, email: &str, password: &str, metadata: Metadata) -> AuthResult<Identity> {
        let password_hash = hash_password(password)?;

        let mut directory = self.write_directory();
        if directory.accounts.contains_key(email) {
            return Err(AuthError::invalid_field("email", "User already registered"));
        }

        let identity = Identity {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.to_string(),
            metadata: metadata.clone(),
            created_at: Utc::now(),
        };

        let text = |key: &str| {
            metadata
                .get(key)
                .and_then(|value| value.as_str())
                .map(str::to_string)
        };
        let profile = Profile {
            identity_id: identity.id.clone(),
            first_name: text("first_name"),
            last_name: text("last_name"),
            avatar_url: text("avatar_url"),
            email: Some(email.to_string()),
            phone: text("phone"),
            category: text("category"),
        };

        directory.profiles.insert(identity.id.clone(), profile);
        directory
            .roles
            .push(RoleAssignment::new(identity.id.clone(), Role::User));
        directory.accounts.insert(
            email.to_string(),
            Account {
                identity: identity.clone(),
                password_hash,
                locked: false,
            },
        );

        Ok(identity)
    }

    /// Row-level check: role rows may only be changed by a signed-in admin
    fn require_admin_session(&self, directory: &Directory) -> AuthResult<()> {
        let session = directory
            .current
            .as_ref()
            .ok_or_else(|| AuthError::auth("Not signed in"))?;

        let is_admin = directory
            .roles
            .iter()
            .any(|row| row.identity_id == session.identity.id && row.role == Role::Admin);
        if !is_admin {
            return Err(AuthError::forbidden(
                "row-level policy rejected change to user_roles",
            ));
        }
        Ok(())
    }
}

impl Default for InMemoryIdentityService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityService for InMemoryIdentityService {
    async fn register(&self, email: &str, password: &str, metadata: Metadata) -> AuthResult<()> {
        self.take_fault(ServiceOperation::Register)?;

        let email = validate_email(email)?;
        validate_password(password)?;

        let identity = self.create_account(&email, password, metadata)?;
        info!(identity_id = %identity.id, "Account registered");

        // Accounts are confirmed on creation, so registering signs in.
        let session = self.issue_session(identity);
        self.write_directory().current = Some(session.clone());
        self.notify(SessionChange::signed_in(session));
        Ok(())
    }

    async fn authenticate(&self, email: &str, password: &str) -> AuthResult<()> {
        self.take_fault(ServiceOperation::Authenticate)?;

        let email = email.trim().to_lowercase();
        let (identity, password_hash) = {
            let directory = self.read_directory();
            let account = directory
                .accounts
                .get(&email)
                .ok_or_else(|| AuthError::auth("Invalid login credentials"))?;
            if account.locked {
                return Err(AuthError::auth("Account is locked"));
            }
            (account.identity.clone(), account.password_hash.clone())
        };

        if !verify_password(password, &password_hash) {
            warn!(email = %email, "Invalid password");
            return Err(AuthError::auth("Invalid login credentials"));
        }

        let session = self.issue_session(identity);
        self.write_directory().current = Some(session.clone());
        debug!(identity_id = %session.identity.id, "Signed in");
        self.notify(SessionChange::signed_in(session));
        Ok(())
    }

    async fn terminate(&self) -> AuthResult<()> {
        self.take_fault(ServiceOperation::Terminate)?;

        let had_session = self.write_directory().current.take().is_some();
        if had_session {
            self.notify(SessionChange::signed_out());
        }
        Ok(())
    }

    async fn current_session(&self) -> AuthResult<Option<Session>> {
        self.take_fault(ServiceOperation::CurrentSession)?;

        let expired = {
            let mut directory = self.write_directory();
            match &directory.current {
                Some(session) if session.is_expired() => {
                    directory.current = None;
                    true
                }
                Some(session) => return Ok(Some(session.clone())),
                None => return Ok(None),
            }
        };

        if expired {
            self.notify(SessionChange::expired());
        }
        Ok(None)
    }

    fn on_session_change(&self) -> AuthResult<SessionSubscription> {
        if !self.notifications_enabled.load(Ordering::SeqCst) {
            return Err(AuthError::network("notification channel unavailable"));
        }
        Ok(SessionSubscription::new(self.changes.subscribe()))
    }

    async fn fetch_record(
        &self,
        table: RecordTable,
        identity_id: &str,
    ) -> AuthResult<serde_json::Value> {
        self.take_fault(ServiceOperation::FetchRecord)?;

        let delay = self.lock_faults().fetch_delays.get(identity_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let directory = self.read_directory();
        let record = match table {
            RecordTable::Profiles => match directory.profiles.get(identity_id) {
                Some(profile) => serde_json::to_value(profile)?,
                None => serde_json::Value::Null,
            },
            RecordTable::Roles => {
                let rows: Vec<&RoleAssignment> = directory
                    .roles
                    .iter()
                    .filter(|row| row.identity_id == identity_id)
                    .collect();
                serde_json::to_value(rows)?
            }
        };
        Ok(record)
    }

    async fn assign_role(&self, identity_id: &str, role: Role) -> AuthResult<()> {
        self.take_fault(ServiceOperation::AssignRole)?;

        let mut directory = self.write_directory();
        self.require_admin_session(&directory)?;

        if !directory.profiles.contains_key(identity_id) {
            return Err(AuthError::invalid_field("identity_id", "Unknown identity"));
        }

        let row = RoleAssignment::new(identity_id, role);
        if !directory.roles.contains(&row) {
            directory.roles.push(row);
        }
        Ok(())
    }

    async fn remove_role(&self, identity_id: &str, role: Role) -> AuthResult<()> {
        self.take_fault(ServiceOperation::RemoveRole)?;

        let mut directory = self.write_directory();
        self.require_admin_session(&directory)?;

        directory
            .roles
            .retain(|row| !(row.identity_id == identity_id && row.role == role));
        Ok(())
    }
}

/// Hash password using Argon2
fn hash_password(password: &str) -> AuthResult<String> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::internal(format!("Failed to hash password: {}", e)))
}

/// Verify password against hash
fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_signs_in_and_creates_rows() {
        let service = InMemoryIdentityService::new();
        let mut subscription = service.on_session_change().unwrap();

        let mut metadata = Metadata::new();
        metadata.insert("first_name".to_string(), "Ada".into());
        service
            .register("Ada@Example.com", "secret-pw", metadata)
            .await
            .unwrap();

        let change = subscription.recv().await.unwrap();
        let session = change.session.unwrap();
        assert_eq!(session.identity.email, "ada@example.com");

        let profile = service
            .fetch_record(RecordTable::Profiles, session.identity_id())
            .await
            .unwrap();
        assert_eq!(profile["first_name"], "Ada");

        let roles = service
            .fetch_record(RecordTable::Roles, session.identity_id())
            .await
            .unwrap();
        assert_eq!(roles[0]["role"], "user");
    }

    #[tokio::test]
    async fn test_duplicate_and_weak_registrations() {
        let service = InMemoryIdentityService::new();
        service.add_account(SeedAccount::new("a@x.com", "secret-pw")).unwrap();

        let duplicate = service
            .register("a@x.com", "another-pw", Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(duplicate, AuthError::Validation { .. }));

        let weak = service
            .register("b@x.com", "pw", Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(weak, AuthError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_authenticate_rejects_bad_credentials_and_locked_accounts() {
        let service = InMemoryIdentityService::new();
        service.add_account(SeedAccount::new("a@x.com", "secret-pw")).unwrap();

        let wrong = service.authenticate("a@x.com", "nope-nope").await.unwrap_err();
        assert_eq!(wrong, AuthError::auth("Invalid login credentials"));

        let unknown = service.authenticate("z@x.com", "secret-pw").await.unwrap_err();
        assert_eq!(unknown, AuthError::auth("Invalid login credentials"));

        service.lock_account("a@x.com").unwrap();
        let locked = service.authenticate("a@x.com", "secret-pw").await.unwrap_err();
        assert_eq!(locked, AuthError::auth("Account is locked"));
        assert!(service.active_session().is_none());
    }

    #[tokio::test]
    async fn test_terminate_without_session_is_silent() {
        let service = InMemoryIdentityService::new();
        let mut subscription = service.on_session_change().unwrap();

        service.terminate().await.unwrap();
        assert!(matches!(
            subscription.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_expired_session_is_dropped_on_read() {
        let service =
            InMemoryIdentityService::new().with_session_ttl(chrono::Duration::seconds(-1));
        service.add_account(SeedAccount::new("a@x.com", "secret-pw")).unwrap();
        service.authenticate("a@x.com", "secret-pw").await.unwrap();

        assert!(service.current_session().await.unwrap().is_none());
        assert!(service.active_session().is_none());
    }

    #[tokio::test]
    async fn test_role_rows_require_admin_session() {
        let service = InMemoryIdentityService::new();
        let member = service.add_account(SeedAccount::new("m@x.com", "secret-pw")).unwrap();
        service
            .add_account(SeedAccount::new("boss@x.com", "secret-pw").with_roles(&[Role::Admin]))
            .unwrap();

        let anonymous = service.assign_role(&member.id, Role::TeamLead).await.unwrap_err();
        assert!(matches!(anonymous, AuthError::Auth { .. }));

        service.authenticate("m@x.com", "secret-pw").await.unwrap();
        let member_attempt = service.assign_role(&member.id, Role::Admin).await.unwrap_err();
        assert!(matches!(member_attempt, AuthError::Authorization { .. }));

        service.authenticate("boss@x.com", "secret-pw").await.unwrap();
        service.assign_role(&member.id, Role::TeamLead).await.unwrap();
        service.assign_role(&member.id, Role::TeamLead).await.unwrap();

        let roles = service
            .fetch_record(RecordTable::Roles, &member.id)
            .await
            .unwrap();
        assert_eq!(roles.as_array().map(Vec::len), Some(2));

        service.remove_role(&member.id, Role::TeamLead).await.unwrap();
        let roles = service
            .fetch_record(RecordTable::Roles, &member.id)
            .await
            .unwrap();
        assert_eq!(roles.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_injected_faults_fire_once() {
        let service = InMemoryIdentityService::new();
        service.fail_next(ServiceOperation::Terminate, AuthError::network("offline"));

        assert!(service.terminate().await.is_err());
        assert!(service.terminate().await.is_ok());
    }

    #[test]
    fn test_seed_file_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.toml");
        std::fs::write(
            &path,
            r#"
            [[accounts]]
            email = "lead@x.com"
            password = "secret-pw"
            first_name = "Lee"
            roles = ["team_lead"]
            "#,
        )
        .unwrap();

        let service = InMemoryIdentityService::from_seed_file(&path, 8).unwrap();
        let directory = service.read_directory();
        let account = directory.accounts.get("lead@x.com").unwrap();
        assert!(directory
            .roles
            .contains(&RoleAssignment::new(account.identity.id.clone(), Role::TeamLead)));
    }
}
