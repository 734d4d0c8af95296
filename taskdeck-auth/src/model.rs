//! Identity, session, profile and role records
//!
//! These are cached copies of what the identity service owns. The store never
//! edits them in place; it only replaces them wholesale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Free-form metadata attached to an identity at sign-up
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Externally issued, authoritative representation of a signed-up user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

/// Proof of an authenticated identity, time-bounded
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub identity: Identity,
}

impl Session {
    pub fn identity_id(&self) -> &str {
        &self.identity.id
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

// Tokens stay out of logs.
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("identity", &self.identity.id)
            .finish()
    }
}

/// User-editable descriptive record, keyed 1:1 with an identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(alias = "id")]
    pub identity_id: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

impl Profile {
    pub fn new(identity_id: impl Into<String>) -> Self {
        Self {
            identity_id: identity_id.into(),
            first_name: None,
            last_name: None,
            avatar_url: None,
            email: None,
            phone: None,
            category: None,
        }
    }

    /// "First Last", whichever parts are present
    pub fn display_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|part| !part.trim().is_empty())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

/// Privilege labels. Declaration order is the subsumption order, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    TeamLead,
    ProjectManager,
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::User, Role::TeamLead, Role::ProjectManager, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::TeamLead => "team_lead",
            Role::ProjectManager => "project_manager",
            Role::Admin => "admin",
        }
    }

    /// Whether holding `self` grants the privileges of `other`.
    ///
    /// admin ⊇ project_manager ⊇ team_lead ⊇ user
    pub fn subsumes(&self, other: Role) -> bool {
        *self >= other
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "team_lead" => Ok(Role::TeamLead),
            "project_manager" => Ok(Role::ProjectManager),
            "admin" => Ok(Role::Admin),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// One {identity, role} pair as stored by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    #[serde(alias = "user_id")]
    pub identity_id: String,
    pub role: Role,
}

impl RoleAssignment {
    pub fn new(identity_id: impl Into<String>, role: Role) -> Self {
        Self {
            identity_id: identity_id.into(),
            role,
        }
    }
}

/// Tables the store reads through `IdentityService::fetch_record`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordTable {
    Profiles,
    Roles,
}

impl RecordTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordTable::Profiles => "profiles",
            RecordTable::Roles => "user_roles",
        }
    }

    /// Column holding the identity reference
    pub fn identity_column(&self) -> &'static str {
        match self {
            RecordTable::Profiles => "id",
            RecordTable::Roles => "user_id",
        }
    }
}

impl std::fmt::Display for RecordTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the identity service reported a session transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    SessionExpired,
}

impl std::fmt::Display for AuthEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AuthEvent::SignedIn => "signed_in",
            AuthEvent::SignedOut => "signed_out",
            AuthEvent::TokenRefreshed => "token_refreshed",
            AuthEvent::SessionExpired => "session_expired",
        };
        f.write_str(name)
    }
}

/// A session transition delivered over the notification channel
#[derive(Debug, Clone, PartialEq)]
pub struct SessionChange {
    pub event: AuthEvent,
    pub session: Option<Session>,
}

impl SessionChange {
    pub fn signed_in(session: Session) -> Self {
        Self {
            event: AuthEvent::SignedIn,
            session: Some(session),
        }
    }

    pub fn refreshed(session: Session) -> Self {
        Self {
            event: AuthEvent::TokenRefreshed,
            session: Some(session),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            event: AuthEvent::SignedOut,
            session: None,
        }
    }

    pub fn expired() -> Self {
        Self {
            event: AuthEvent::SessionExpired,
            session: None,
        }
    }
}
