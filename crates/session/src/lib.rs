//! Fog session: one explicit context that owns the store, the actor registry,
//! the apply queue, the proximity scheduler, and the authority connection.
//!
//! # Invariants
//! - Shutdown order: scheduler, authority connection, persistence, apply queue.
//! - A session whose record fails to load never becomes active.
//! - Collaborators reach the store through [`FogSession::view`] or an apply handle.

pub mod config;
pub mod session;

pub use config::{
    CONFIG_FILE_NAME, ConfigError, DEFAULT_ENDPOINT, FogConfig, ProximitySettings,
    ReconnectSettings,
};
pub use session::{BeginReport, Collaborators, EndReport, FogSession, SessionError};
