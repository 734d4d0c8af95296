//! Taskdeck Auth - session, profile and role state for Taskdeck clients
//!
//! The [`SessionStore`] mirrors the hosted identity backend: it listens for
//! session transitions, loads the signed-in identity's profile and roles, and
//! exposes role flags for gating features.
//!
//! ## Architecture
//!
//! - **Store** (`store`, `state`, `roles`): client-side state and derived flags
//! - **Service seam** (`service`): the [`IdentityService`] trait
//! - **Backends** (`memory`, `rest`, `backend`): in-process and HTTP services

pub mod backend;
pub mod error;
pub mod invite;
pub mod memory;
pub mod model;
pub mod rest;
pub mod roles;
pub mod service;
pub mod state;
pub mod store;
pub mod validation;

pub use backend::create_identity_service;
pub use error::{AuthError, AuthErrorKind, AuthResult};
pub use invite::Invitation;
pub use memory::{InMemoryIdentityService, SeedAccount, SeedData, ServiceOperation};
pub use model::{
    AuthEvent, Identity, Metadata, Profile, RecordTable, Role, RoleAssignment, Session,
    SessionChange,
};
pub use rest::{RestClientConfig, RestIdentityService};
pub use roles::RoleSet;
pub use service::{IdentityService, SessionSubscription};
pub use state::AuthSnapshot;
pub use store::SessionStore;
