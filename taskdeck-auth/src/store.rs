//! Session/role store
//!
//! Holds the current session, the identity it is bound to, that identity's
//! profile and roles, and whether the first session read has resolved.
//! The store is an explicit value owned by the application root: create it
//! with [`SessionStore::connect`] and tear it down with
//! [`SessionStore::shutdown`] (or by dropping it).
//!
//! State only changes in reaction to the identity service: notifications,
//! the initial session read, and the profile/role loads they trigger.
//! `terminate` additionally clears locally once the service has confirmed.

use crate::error::{AuthError, AuthResult};
use crate::invite::Invitation;
use crate::model::{Identity, Metadata, Profile, RecordTable, Role, RoleAssignment, Session};
use crate::roles::RoleSet;
use crate::service::{IdentityService, SessionSubscription};
use crate::state::AuthSnapshot;
use crate::validation::{validate_email, validate_password};
use serde::Deserialize;
use std::sync::{Arc, Mutex, MutexGuard};
use taskdeck_core::{log_operation_error, log_operation_start, log_operation_success};
use tokio::sync::{broadcast::error::RecvError, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Client-side container for session, profile and role state
pub struct SessionStore {
    inner: Arc<StoreInner>,
    /// Notification listener and the initial session read
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct StoreInner {
    service: Arc<dyn IdentityService>,
    state: watch::Sender<AuthSnapshot>,
    /// Held across every state write so writes and load scheduling stay ordered
    loader: Mutex<DetailLoader>,
}

/// Tracks the profile/role load for the current identity
#[derive(Default)]
struct DetailLoader {
    generation: u64,
    identity_id: Option<String>,
    task: Option<JoinHandle<()>>,
}

impl DetailLoader {
    /// Abort whatever is in flight and hand out a fresh generation
    fn supersede(&mut self, identity_id: Option<String>) -> u64 {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.generation += 1;
        self.identity_id = identity_id;
        self.generation
    }

    fn is_current(&self, identity_id: &str, generation: u64) -> bool {
        self.generation == generation && self.identity_id.as_deref() == Some(identity_id)
    }
}

impl SessionStore {
    /// Subscribe to session changes and start reading the persisted session.
    ///
    /// Fails with [`AuthError::Config`] when the notification channel is
    /// unavailable; that is a deployment problem, not a runtime one.
    pub async fn connect(service: Arc<dyn IdentityService>) -> AuthResult<Self> {
        let subscription = service.on_session_change().map_err(|e| {
            AuthError::config(format!("Session notifications unavailable: {}", e))
        })?;

        let (state, _) = watch::channel(AuthSnapshot::initial());
        let inner = Arc::new(StoreInner {
            service,
            state,
            loader: Mutex::new(DetailLoader::default()),
        });

        let listener = tokio::spawn(Arc::clone(&inner).listen(subscription));
        let initial = tokio::spawn(Arc::clone(&inner).load_initial_session());

        info!("Session store connected");

        Ok(Self {
            inner,
            tasks: Mutex::new(vec![listener, initial]),
        })
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> AuthSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Receiver that is notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().is_loading
    }

    pub fn identity(&self) -> Option<Identity> {
        self.inner.state.borrow().identity.clone()
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.state.borrow().session.clone()
    }

    pub fn profile(&self) -> Option<Profile> {
        self.inner.state.borrow().profile.clone()
    }

    pub fn roles(&self) -> RoleSet {
        self.inner.state.borrow().roles.clone()
    }

    /// Literal membership in the current role set
    pub fn has_role(&self, role: Role) -> bool {
        self.inner.state.borrow().has_role(role)
    }

    pub fn is_admin(&self) -> bool {
        self.inner.state.borrow().is_admin()
    }

    pub fn is_project_manager(&self) -> bool {
        self.inner.state.borrow().is_project_manager()
    }

    pub fn is_team_lead(&self) -> bool {
        self.inner.state.borrow().is_team_lead()
    }

    /// Wait until the state satisfies `predicate`, then return it
    pub async fn wait_for<F>(&self, predicate: F) -> AuthResult<AuthSnapshot>
    where
        F: FnMut(&AuthSnapshot) -> bool,
    {
        let mut receiver = self.inner.state.subscribe();
        let snapshot = receiver
            .wait_for(predicate)
            .await
            .map(|snapshot| (*snapshot).clone())
            .map_err(|_| AuthError::internal("session store closed"))?;
        Ok(snapshot)
    }

    /// Wait for the first session read (or notification) to resolve
    pub async fn wait_until_loaded(&self) -> AuthResult<AuthSnapshot> {
        self.wait_for(|snapshot| !snapshot.is_loading).await
    }

    /// Create an identity. The resulting session, if the service starts one,
    /// arrives through the notification channel.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        metadata: Metadata,
    ) -> AuthResult<()> {
        let email = validate_email(email)?;
        validate_password(password)?;

        log_operation_start!("register", email = %email);
        match self.inner.service.register(&email, password, metadata).await {
            Ok(()) => {
                log_operation_success!("register", email = %email);
                Ok(())
            }
            Err(e) => {
                log_operation_error!("register", e, email = %email);
                Err(e)
            }
        }
    }

    /// Sign in. The session arrives through the notification channel.
    pub async fn authenticate(&self, email: &str, password: &str) -> AuthResult<()> {
        let email = validate_email(email)?;
        if password.is_empty() {
            return Err(AuthError::invalid_field("password", "Password is required"));
        }

        log_operation_start!("authenticate", email = %email);
        match self.inner.service.authenticate(&email, password).await {
            Ok(()) => {
                log_operation_success!("authenticate", email = %email);
                Ok(())
            }
            Err(e) => {
                log_operation_error!("authenticate", e, email = %email);
                Err(e)
            }
        }
    }

    /// Sign out. Succeeds without a session and then leaves state untouched.
    pub async fn terminate(&self) -> AuthResult<()> {
        log_operation_start!("terminate");
        if let Err(e) = self.inner.service.terminate().await {
            log_operation_error!("terminate", e);
            return Err(e);
        }

        // The sign-out notification clears too; clearing twice is a no-op.
        self.inner.apply_session(None, false);
        log_operation_success!("terminate");
        Ok(())
    }

    /// Reload profile and roles for the current identity.
    ///
    /// A failed reload leaves state and any background load untouched.
    pub async fn refresh(&self) -> AuthResult<AuthSnapshot> {
        let (identity_id, generation) = {
            let loader = self.inner.lock_loader();
            let identity_id = self
                .inner
                .state
                .borrow()
                .identity_id()
                .map(str::to_string)
                .ok_or_else(|| AuthError::not_authenticated("refresh"))?;
            (identity_id, loader.generation)
        };

        match self.inner.fetch_details(&identity_id).await {
            Ok(details) => {
                self.inner.apply_refresh(&identity_id, generation, details);
                Ok(self.snapshot())
            }
            Err(e) => {
                warn!(identity_id = %identity_id, error = %e, "Profile refresh failed");
                Err(e)
            }
        }
    }

    /// Check that the current identity holds `role` (through the hierarchy)
    pub fn require_role(&self, operation: &str, role: Role) -> AuthResult<Identity> {
        let state = self.inner.state.borrow();
        let identity = state
            .identity
            .clone()
            .ok_or_else(|| AuthError::not_authenticated(operation))?;

        if !state.roles.satisfies(role) {
            return Err(AuthError::requires_role(operation, role));
        }

        Ok(identity)
    }

    /// Give `identity_id` a role. Admin only.
    pub async fn grant_role(&self, identity_id: &str, role: Role) -> AuthResult<()> {
        let actor = self.require_role("grant_role", Role::Admin)?;

        log_operation_start!("grant_role", target_id = identity_id, role = %role);
        if let Err(e) = self.inner.service.assign_role(identity_id, role).await {
            log_operation_error!("grant_role", e, target_id = identity_id);
            return Err(e);
        }
        log_operation_success!("grant_role", target_id = identity_id, role = %role);

        if actor.id == identity_id {
            self.reload_own_roles().await;
        }
        Ok(())
    }

    /// Take a role away from `identity_id`. Admin only.
    pub async fn revoke_role(&self, identity_id: &str, role: Role) -> AuthResult<()> {
        let actor = self.require_role("revoke_role", Role::Admin)?;

        log_operation_start!("revoke_role", target_id = identity_id, role = %role);
        if let Err(e) = self.inner.service.remove_role(identity_id, role).await {
            log_operation_error!("revoke_role", e, target_id = identity_id);
            return Err(e);
        }
        log_operation_success!("revoke_role", target_id = identity_id, role = %role);

        if actor.id == identity_id {
            self.reload_own_roles().await;
        }
        Ok(())
    }

    /// The change is already committed; a failed reload only delays it
    /// until the next session change or refresh.
    async fn reload_own_roles(&self) {
        if let Err(e) = self.refresh().await {
            warn!(error = %e, "Role change committed but reload failed");
        }
    }

    /// Record an invitation for `email`. Team leads and above only.
    ///
    /// Nothing is sent or persisted; the caller decides what to do with it.
    pub fn invite_member(&self, email: &str) -> AuthResult<Invitation> {
        let inviter = self.require_role("invite_member", Role::TeamLead)?;
        let email = validate_email(email)?;

        if email == inviter.email.to_lowercase() {
            return Err(AuthError::invalid_field("email", "You cannot invite yourself"));
        }

        let invitation = Invitation::new(email, &inviter);
        info!(
            email = %invitation.email,
            invited_by = %invitation.invited_by,
            "Member invitation recorded"
        );
        Ok(invitation)
    }

    /// Stop listening for notifications and abort in-flight loads
    pub fn shutdown(&self) {
        let tasks = {
            let mut guard = self
                .tasks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *guard)
        };
        if tasks.is_empty() {
            return;
        }

        for task in tasks {
            task.abort();
        }
        self.inner.lock_loader().supersede(None);
        info!("Session store shut down");
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl StoreInner {
    fn lock_loader(&self) -> MutexGuard<'_, DetailLoader> {
        // Nothing panics while holding the guard; recover if that changes.
        self.loader
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn listen(self: Arc<Self>, mut subscription: SessionSubscription) {
        loop {
            match subscription.recv().await {
                Ok(change) => {
                    debug!(event = %change.event, "Session change received");
                    self.apply_session(change.session, false);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Session notifications lagged, re-reading session");
                    match self.service.current_session().await {
                        Ok(session) => {
                            self.apply_session(session, false);
                        }
                        Err(e) => warn!(error = %e, "Session resync failed"),
                    }
                }
                Err(RecvError::Closed) => {
                    warn!("Session notification channel closed");
                    break;
                }
            }
        }
    }

    async fn load_initial_session(self: Arc<Self>) {
        match self.service.current_session().await {
            Ok(session) => {
                if !self.apply_session(session, true) {
                    debug!("Initial session read superseded by a notification");
                }
            }
            Err(e) => {
                warn!(error = %e, "Initial session read failed");
                self.state.send_if_modified(|state| {
                    let was_loading = state.is_loading;
                    state.is_loading = false;
                    was_loading
                });
            }
        }
    }

    /// Install `session` (or clear on `None`) and schedule the detail load.
    ///
    /// With `only_if_unknown`, nothing happens once any path has already
    /// resolved the session. Returns whether the session was applied.
    fn apply_session(self: &Arc<Self>, session: Option<Session>, only_if_unknown: bool) -> bool {
        let mut loader = self.lock_loader();
        let identity_id = session.as_ref().map(|s| s.identity_id().to_string());

        let mut applied = false;
        self.state.send_if_modified(|state| {
            if only_if_unknown && !state.is_loading {
                return false;
            }
            applied = true;

            match session {
                Some(session) => {
                    if state.identity_id() != Some(session.identity_id()) {
                        state.profile = None;
                        state.roles.clear();
                    }
                    state.identity = Some(session.identity.clone());
                    state.session = Some(session);
                    state.is_loading = false;
                    true
                }
                None => state.clear_session(),
            }
        });

        if !applied {
            return false;
        }

        let generation = loader.supersede(identity_id.clone());
        match identity_id {
            Some(identity_id) => {
                info!(identity_id = %identity_id, "Session active");
                let inner = Arc::clone(self);
                loader.task = Some(tokio::spawn(async move {
                    let details = inner.fetch_details(&identity_id).await;
                    inner.apply_details(&identity_id, generation, details);
                }));
            }
            None => debug!("Session cleared"),
        }

        true
    }

    async fn fetch_details(&self, identity_id: &str) -> AuthResult<(Option<Profile>, RoleSet)> {
        let (profile, roles) = futures::try_join!(
            self.service.fetch_record(RecordTable::Profiles, identity_id),
            self.service.fetch_record(RecordTable::Roles, identity_id),
        )?;

        Ok((
            decode_profile(identity_id, profile)?,
            decode_roles(identity_id, roles)?,
        ))
    }

    /// Apply a finished load unless a newer session or load replaced it
    fn apply_details(
        &self,
        identity_id: &str,
        generation: u64,
        details: AuthResult<(Option<Profile>, RoleSet)>,
    ) {
        let (profile, roles) = match details {
            Ok(details) => details,
            Err(e) => {
                warn!(identity_id, error = %e, "Failed to load profile and roles");
                return;
            }
        };

        let loader = self.lock_loader();
        if !loader.is_current(identity_id, generation) {
            debug!(identity_id, generation, "Discarding stale profile load");
            return;
        }
        self.write_details(identity_id, profile, roles);
        drop(loader);
    }

    /// Apply a successful `refresh` unless the session moved on meanwhile.
    ///
    /// Any background load still in flight started earlier, so it is aborted
    /// before it can overwrite the fresher rows.
    fn apply_refresh(
        &self,
        identity_id: &str,
        generation: u64,
        (profile, roles): (Option<Profile>, RoleSet),
    ) {
        let mut loader = self.lock_loader();
        if !loader.is_current(identity_id, generation) {
            debug!(identity_id, generation, "Discarding superseded refresh");
            return;
        }
        loader.supersede(Some(identity_id.to_string()));
        self.write_details(identity_id, profile, roles);
        drop(loader);
    }

    /// Caller holds the loader lock
    fn write_details(&self, identity_id: &str, profile: Option<Profile>, roles: RoleSet) {
        let applied = self.state.send_if_modified(|state| {
            if state.identity_id() != Some(identity_id) {
                return false;
            }
            state.profile = profile;
            state.roles = roles;
            true
        });

        if applied {
            debug!(identity_id, "Profile and roles loaded");
        }
    }
}

fn decode_profile(identity_id: &str, record: serde_json::Value) -> AuthResult<Option<Profile>> {
    let record = match record {
        serde_json::Value::Null => return Ok(None),
        // Row APIs answer with a list of matching rows.
        serde_json::Value::Array(rows) => match rows.into_iter().next() {
            Some(row) => row,
            None => return Ok(None),
        },
        other => other,
    };

    let profile: Profile = serde_json::from_value(record)
        .map_err(|e| AuthError::record(RecordTable::Profiles, e.to_string()))?;

    if profile.identity_id != identity_id {
        return Err(AuthError::record(
            RecordTable::Profiles,
            format!(
                "profile belongs to {} but was requested for {}",
                profile.identity_id, identity_id
            ),
        ));
    }

    Ok(Some(profile))
}

#[derive(Deserialize)]
struct RoleRow {
    #[serde(alias = "user_id")]
    identity_id: String,
    role: String,
}

fn decode_roles(identity_id: &str, record: serde_json::Value) -> AuthResult<RoleSet> {
    let rows: Vec<RoleRow> = match record {
        serde_json::Value::Null => Vec::new(),
        other => serde_json::from_value(other)
            .map_err(|e| AuthError::record(RecordTable::Roles, e.to_string()))?,
    };

    let assignments: Vec<RoleAssignment> = rows
        .into_iter()
        .filter_map(|row| match row.role.parse::<Role>() {
            Ok(role) => Some(RoleAssignment::new(row.identity_id, role)),
            Err(e) => {
                warn!(identity_id, error = %e, "Ignoring unknown role");
                None
            }
        })
        .collect();

    Ok(RoleSet::from_assignments(identity_id, &assignments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_profile_shapes() {
        assert_eq!(decode_profile("u1", json!(null)).unwrap(), None);
        assert_eq!(decode_profile("u1", json!([])).unwrap(), None);

        let from_row = decode_profile("u1", json!([{ "id": "u1", "first_name": "Ada" }]))
            .unwrap()
            .unwrap();
        assert_eq!(from_row.first_name.as_deref(), Some("Ada"));

        let from_object = decode_profile("u1", json!({ "identity_id": "u1" })).unwrap();
        assert!(from_object.is_some());
    }

    #[test]
    fn test_decode_profile_rejects_foreign_identity() {
        let error = decode_profile("u1", json!({ "id": "u2" })).unwrap_err();
        assert!(matches!(error, AuthError::Record { .. }));
    }

    #[test]
    fn test_decode_roles_skips_unknown_and_foreign_rows() {
        let roles = decode_roles(
            "u1",
            json!([
                { "user_id": "u1", "role": "team_lead" },
                { "user_id": "u1", "role": "owner" },
                { "user_id": "u2", "role": "admin" }
            ]),
        )
        .unwrap();

        assert!(roles.has_role(Role::TeamLead));
        assert!(!roles.is_admin());
        assert_eq!(roles.len(), 1);
    }

    #[test]
    fn test_decode_roles_rejects_garbage() {
        let error = decode_roles("u1", json!({ "role": "admin" })).unwrap_err();
        assert!(matches!(error, AuthError::Record { .. }));
    }

    #[test]
    fn test_detail_loader_generations() {
        let mut loader = DetailLoader::default();
        let first = loader.supersede(Some("u1".to_string()));
        assert!(loader.is_current("u1", first));

        let second = loader.supersede(Some("u1".to_string()));
        assert!(!loader.is_current("u1", first));
        assert!(loader.is_current("u1", second));

        let cleared = loader.supersede(None);
        assert!(!loader.is_current("u1", cleared));
    }
}
