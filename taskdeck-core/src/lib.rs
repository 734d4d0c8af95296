//! Taskdeck Core - shared plumbing for the Taskdeck workspace
//!
//! Error context, structured logging, TOML configuration and the async
//! helpers (retry, timeout) used by the backend clients.

pub mod async_utils;
pub mod config;
pub mod error;
pub mod logging;

pub use async_utils::*;
pub use config::*;
pub use error::*;
pub use logging::*;

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use tokio;
pub use tracing;
