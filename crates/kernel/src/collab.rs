//! Seams to the collaborators that live outside the core: the live world,
//! the actor position feed, and whoever rebuilds meshes when tiles change.

use fogwar_common::{ActorSample, HeightBounds, TilePosition, VoxelClass, VoxelSample};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::ops::RangeInclusive;

/// Failure to read live world data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldReadError {
    #[error("world is not available")]
    Unavailable,
    #[error("voxel ({x}, {y}, {z}) is not loaded")]
    NotLoaded { x: i32, y: i32, z: i32 },
    #[error("{0}")]
    Other(String),
}

/// Read access to the live world, used only while capturing snapshots.
pub trait VoxelReader: Send + Sync {
    /// Current vertical extent of the world.
    fn height_bounds(&self) -> HeightBounds;

    /// Occupancy facts for one voxel.
    fn probe(&self, x: i32, y: i32, z: i32) -> Result<VoxelSample, WorldReadError>;

    fn classify(&self, x: i32, y: i32, z: i32) -> Result<VoxelClass, WorldReadError> {
        self.probe(x, y, z).map(VoxelClass::from)
    }
}

/// Positions of every candidate actor at the time of the call.
pub trait ActorFeed: Send + Sync {
    fn samples(&self) -> Vec<ActorSample>;
}

impl<F> ActorFeed for F
where
    F: Fn() -> Vec<ActorSample> + Send + Sync,
{
    fn samples(&self) -> Vec<ActorSample> {
        self()
    }
}

/// Receives the set of tiles whose rendering-relevant data changed.
///
/// Called once per batch of store writes, never per tile.
pub trait RebuildSink: Send + Sync {
    fn tiles_changed(&self, tiles: &BTreeSet<TilePosition>);
}

impl<F> RebuildSink for F
where
    F: Fn(&BTreeSet<TilePosition>) + Send + Sync,
{
    fn tiles_changed(&self, tiles: &BTreeSet<TilePosition>) {
        self(tiles)
    }
}

/// Sink that drops every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl RebuildSink for NullSink {
    fn tiles_changed(&self, _tiles: &BTreeSet<TilePosition>) {}
}

/// Sink that keeps every batch it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    batches: Mutex<Vec<BTreeSet<TilePosition>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<BTreeSet<TilePosition>> {
        self.batches.lock().clone()
    }

    /// Union of every batch received so far.
    pub fn all_tiles(&self) -> BTreeSet<TilePosition> {
        self.batches.lock().iter().flatten().copied().collect()
    }

    pub fn take(&self) -> Vec<BTreeSet<TilePosition>> {
        std::mem::take(&mut *self.batches.lock())
    }
}

impl RebuildSink for RecordingSink {
    fn tiles_changed(&self, tiles: &BTreeSet<TilePosition>) {
        self.batches.lock().push(tiles.clone());
    }
}

/// Inclusive range of 16-voxel section indices covering `bounds`.
///
/// Renderers that rebuild per section use this to schedule every section of
/// a changed tile. `None` for a world with no height.
pub fn section_range(bounds: HeightBounds) -> Option<RangeInclusive<i32>> {
    if bounds.height == 0 {
        return None;
    }
    let bottom = i64::from(bounds.bottom);
    let top = bounds.top() - 1;
    Some(((bottom >> 4) as i32)..=((top >> 4) as i32))
}

/// Synthetic terrain: solid up to `ground`, liquid up to `sea_level`, air above.
///
/// Used by tests and the CLI simulator in place of a real engine world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayeredWorld {
    pub bounds: HeightBounds,
    /// First Y above the solid layer.
    pub ground: i32,
    /// First Y above the liquid layer.
    pub sea_level: i32,
}

impl LayeredWorld {
    pub fn new(bounds: HeightBounds, ground: i32, sea_level: i32) -> Self {
        Self {
            bounds,
            ground,
            sea_level,
        }
    }
}

impl VoxelReader for LayeredWorld {
    fn height_bounds(&self) -> HeightBounds {
        self.bounds
    }

    fn probe(&self, x: i32, y: i32, z: i32) -> Result<VoxelSample, WorldReadError> {
        if !self.bounds.contains(y) {
            return Err(WorldReadError::NotLoaded { x, y, z });
        }
        Ok(if y < self.ground {
            VoxelSample::SOLID
        } else if y < self.sea_level {
            VoxelSample::LIQUID
        } else {
            VoxelSample::EMPTY
        })
    }
}
