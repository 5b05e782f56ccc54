//! Read-only face of the store for render-side collaborators.

use crate::store::VisibilityStore;
use fogwar_common::{FogAppearance, TilePosition, VisibilityState, VoxelClass, VoxelQuery};
use std::sync::Arc;

/// What a renderer should draw for a voxel of a fogged tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FogFill {
    /// Frozen classification from the tile's snapshot.
    Snapshot(VoxelClass),
    /// No usable snapshot data: draw the tile's fog appearance.
    DefaultFill(FogAppearance),
}

#[derive(Clone)]
pub struct FogView {
    store: Arc<VisibilityStore>,
}

impl FogView {
    pub fn new(store: Arc<VisibilityStore>) -> Self {
        Self { store }
    }

    pub fn state(&self, pos: TilePosition) -> VisibilityState {
        self.store.get_state(pos)
    }

    pub fn is_visible(&self, pos: TilePosition) -> bool {
        self.state(pos) == VisibilityState::Visible
    }

    pub fn is_fogged(&self, pos: TilePosition) -> bool {
        self.state(pos) == VisibilityState::Fogged
    }

    pub fn is_hidden(&self, pos: TilePosition) -> bool {
        self.state(pos) == VisibilityState::Hidden
    }

    pub fn fog_appearance(&self, pos: TilePosition) -> FogAppearance {
        self.store.get_fog_override(pos)
    }

    /// Frozen classification of a voxel.
    ///
    /// `None` when the tile is not fogged and live data applies.
    pub fn query_voxel(&self, world_x: i32, world_y: i32, world_z: i32) -> Option<VoxelQuery> {
        let tile = self.store.tile(TilePosition::from_block(world_x, world_z));
        if tile.state != VisibilityState::Fogged {
            return None;
        }
        Some(match tile.snapshot {
            Some(snapshot) => snapshot.query(world_x, world_y, world_z),
            None => VoxelQuery::OutOfRange,
        })
    }

    /// Resolve a voxel of a fogged tile to something drawable.
    pub fn fill_for(&self, world_x: i32, world_y: i32, world_z: i32) -> Option<FogFill> {
        let pos = TilePosition::from_block(world_x, world_z);
        let tile = self.store.tile(pos);
        if tile.state != VisibilityState::Fogged {
            return None;
        }
        let class = tile
            .snapshot
            .and_then(|snapshot| snapshot.query(world_x, world_y, world_z).class());
        Some(match class {
            Some(class) => FogFill::Snapshot(class),
            None => FogFill::DefaultFill(
                tile.appearance
                    .unwrap_or_else(|| self.store.default_appearance()),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::LayeredWorld;
    use crate::store::TileUpdate;
    use fogwar_common::HeightBounds;

    fn view() -> (Arc<VisibilityStore>, FogView) {
        let store = Arc::new(VisibilityStore::default());
        store.attach_world(Arc::new(LayeredWorld::new(HeightBounds::new(0, 16), 4, 6)));
        let view = FogView::new(store.clone());
        (store, view)
    }

    #[test]
    fn unfogged_tiles_use_live_data() {
        let (store, view) = view();
        assert!(view.is_visible(TilePosition::new(0, 0)));
        assert_eq!(view.query_voxel(1, 1, 1), None);
        store.set_state(TilePosition::new(0, 0), VisibilityState::Hidden);
        assert!(view.is_hidden(TilePosition::new(0, 0)));
        assert_eq!(view.fill_for(1, 1, 1), None);
    }

    #[test]
    fn fogged_tile_reads_snapshot() {
        let (store, view) = view();
        store.set_state(TilePosition::new(-1, 0), VisibilityState::Fogged);
        assert!(view.is_fogged(TilePosition::new(-1, 0)));
        assert_eq!(view.query_voxel(-3, 2, 5), Some(VoxelQuery::Solid));
        assert_eq!(view.query_voxel(-3, 5, 5), Some(VoxelQuery::Liquid));
        assert_eq!(view.query_voxel(-3, 99, 5), Some(VoxelQuery::OutOfRange));
        assert_eq!(view.fill_for(-3, 2, 5), Some(FogFill::Snapshot(VoxelClass::Solid)));
        assert_eq!(
            view.fill_for(-3, 99, 5),
            Some(FogFill::DefaultFill(FogAppearance::default()))
        );
    }

    #[test]
    fn fogged_without_snapshot_falls_back_to_appearance() {
        let (store, view) = view();
        store.detach_world();
        let stone = FogAppearance::parse("stone").unwrap();
        store.apply_update(
            TileUpdate::new(TilePosition::new(2, 2), VisibilityState::Fogged).with_appearance(stone.clone()),
        );
        assert_eq!(view.query_voxel(33, 3, 33), Some(VoxelQuery::OutOfRange));
        assert_eq!(view.fill_for(33, 3, 33), Some(FogFill::DefaultFill(stone.clone())));
        assert_eq!(view.fog_appearance(TilePosition::new(2, 2)), stone);
    }
}
