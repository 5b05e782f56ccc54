//! Shared types for the fog-of-war core.
//!
//! Everything here is a plain value type: tile keys, the tri-state visibility
//! classification, voxel classes, height bounds, appearance tokens, and actor
//! identities. No type in this crate owns shared state.

mod types;

pub use types::{
    ActorId, ActorSample, AppearanceError, DEFAULT_STATE, FogAppearance, HeightBounds,
    ParseStateError, TILE_AREA, TILE_SIZE, TilePosition, VisibilityState, VoxelClass, VoxelQuery,
    VoxelSample,
};
