//! Persistence: one verifiable fog record per session, plus tracked actor ids.
//!
//! # Invariants
//! - Files are replaced by rename, never rewritten in place.
//! - Records are content-hashed and checked against the integrity manifest.
//! - A failed load leaves the target store empty.

pub mod actors;
pub mod key;
pub mod record;
pub mod store;

pub use actors::ActorStore;
pub use key::SessionKey;
pub use record::{FogRecord, RECORD_SCHEMA_VERSION, RecordSummary};
pub use store::{LoadOutcome, RecordError, RecordStore};
