//! Fog kernel: authoritative tile visibility, snapshots, and the single-writer apply path.
//!
//! # Invariants
//! - All store mutations from background work flow through the [`ApplyQueue`].
//! - A tile holds an override or snapshot only while Fogged.
//! - Snapshot capture never runs under a store lock.

pub mod actors;
pub mod apply;
pub mod collab;
pub mod snapshot;
pub mod store;
pub mod view;

pub use actors::ActorRegistry;
pub use apply::{ApplyError, ApplyHandle, ApplyQueue};
pub use collab::{
    ActorFeed, LayeredWorld, NullSink, RebuildSink, RecordingSink, VoxelReader, WorldReadError,
    section_range,
};
pub use snapshot::{CaptureError, MAX_SNAPSHOT_HEIGHT, Snapshot, SnapshotError, VoxelCounts};
pub use store::{
    EntryError, PolicyError, StorePolicy, StoreStats, TileEntry, TileUpdate, Transition,
    VisibilityStore,
};
pub use view::{FogFill, FogView};
