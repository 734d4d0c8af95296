//! Read-only view of the store

use crate::model::{Identity, Profile, Role, Session};
use crate::roles::RoleSet;

/// Point-in-time copy of everything the store knows.
///
/// `profile` and `roles` can lag behind `session` for a short window after a
/// sign-in while they are being fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSnapshot {
    pub identity: Option<Identity>,
    pub session: Option<Session>,
    pub profile: Option<Profile>,
    pub roles: RoleSet,
    pub is_loading: bool,
}

impl AuthSnapshot {
    /// State before the first session read resolves
    pub fn initial() -> Self {
        Self {
            identity: None,
            session: None,
            profile: None,
            roles: RoleSet::new(),
            is_loading: true,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    pub fn identity_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|identity| identity.id.as_str())
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.has_role(role)
    }

    pub fn is_admin(&self) -> bool {
        self.roles.is_admin()
    }

    pub fn is_project_manager(&self) -> bool {
        self.roles.is_project_manager()
    }

    pub fn is_team_lead(&self) -> bool {
        self.roles.is_team_lead()
    }

    /// Nothing cached: no session, identity, profile or roles
    pub fn is_signed_out(&self) -> bool {
        self.session.is_none()
            && self.identity.is_none()
            && self.profile.is_none()
            && self.roles.is_empty()
    }

    /// Create a summary string for logging
    pub fn summary(&self) -> String {
        let user_info = match &self.identity {
            Some(identity) => identity.id.clone(),
            None => "anonymous".to_string(),
        };

        format!(
            "AuthSnapshot[user={}, roles={}, profile={}, loading={}]",
            user_info,
            self.roles,
            self.profile.is_some(),
            self.is_loading
        )
    }

    /// Drop everything bound to the session. Returns whether anything changed.
    pub(crate) fn clear_session(&mut self) -> bool {
        let changed = !self.is_signed_out() || self.is_loading;
        self.session = None;
        self.identity = None;
        self.profile = None;
        self.roles.clear();
        self.is_loading = false;
        changed
    }
}

impl Default for AuthSnapshot {
    fn default() -> Self {
        Self::initial()
    }
}
