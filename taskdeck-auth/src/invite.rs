//! Team invitations
//!
//! An invitation is only a record of intent: who invited which address, with
//! what starting role. Delivery and persistence belong to whoever consumes it.

use crate::model::{Identity, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invitation {
    pub id: String,
    pub email: String,
    /// Identity id of the inviter
    pub invited_by: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl Invitation {
    pub(crate) fn new(email: String, inviter: &Identity) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            email,
            invited_by: inviter.id.clone(),
            role: Role::User,
            created_at: Utc::now(),
        }
    }
}
