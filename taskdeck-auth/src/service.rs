//! Identity service seam
//!
//! The store talks to the hosted backend only through [`IdentityService`].
//! Implementations own credential checks, token lifetime, retries and row
//! level authorization; the store treats all of that as opaque.

use crate::error::AuthResult;
use crate::model::{Metadata, RecordTable, Role, Session, SessionChange};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Persistent listener handle for session transitions.
///
/// Dropping the handle (or calling [`SessionSubscription::unsubscribe`]) stops
/// delivery.
#[derive(Debug)]
pub struct SessionSubscription {
    receiver: broadcast::Receiver<SessionChange>,
}

impl SessionSubscription {
    pub fn new(receiver: broadcast::Receiver<SessionChange>) -> Self {
        Self { receiver }
    }

    /// Wait for the next transition.
    ///
    /// `RecvError::Lagged` means transitions were dropped and the caller should
    /// re-read the current session.
    pub async fn recv(&mut self) -> Result<SessionChange, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Take a pending transition without waiting
    pub fn try_recv(&mut self) -> Result<SessionChange, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn unsubscribe(self) {
        drop(self.receiver);
    }
}

#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Create an identity. State changes, if any, arrive as notifications.
    async fn register(&self, email: &str, password: &str, metadata: Metadata) -> AuthResult<()>;

    /// Start a session for the given credentials
    async fn authenticate(&self, email: &str, password: &str) -> AuthResult<()>;

    /// Invalidate the current session. Succeeds when there is none.
    async fn terminate(&self) -> AuthResult<()>;

    /// One-shot read of the persisted session
    async fn current_session(&self) -> AuthResult<Option<Session>>;

    /// Register a persistent listener for session transitions
    fn on_session_change(&self) -> AuthResult<SessionSubscription>;

    /// Look up the record(s) in `table` bound to `identity_id`.
    ///
    /// Profiles resolve to an object (or `null` when missing), roles to an
    /// array of assignments.
    async fn fetch_record(
        &self,
        table: RecordTable,
        identity_id: &str,
    ) -> AuthResult<serde_json::Value>;

    /// Add a role assignment
    async fn assign_role(&self, identity_id: &str, role: Role) -> AuthResult<()>;

    /// Remove a role assignment. Removing an absent role succeeds.
    async fn remove_role(&self, identity_id: &str, role: Role) -> AuthResult<()>;
}
