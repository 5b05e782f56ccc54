use fogwar_common::{ActorSample, TilePosition};
use std::collections::{BTreeSet, HashSet};

/// Tiles occupied by at least one tracked actor.
///
/// Radius queries use Chebyshev distance, so a radius of `r` covers the
/// `(2r + 1)^2` square of tiles around a center.
#[derive(Debug, Clone, Default)]
pub struct ActorGrid {
    tiles: HashSet<TilePosition>,
}

impl ActorGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_samples<'a, I>(samples: I) -> Self
    where
        I: IntoIterator<Item = &'a ActorSample>,
    {
        Self {
            tiles: samples.into_iter().map(ActorSample::tile).collect(),
        }
    }

    pub fn insert(&mut self, tile: TilePosition) {
        self.tiles.insert(tile);
    }

    pub fn tiles(&self) -> &HashSet<TilePosition> {
        &self.tiles
    }

    /// Number of distinct occupied tiles.
    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Every tile within `radius` of any occupied tile.
    pub fn tiles_near(&self, radius: u32) -> BTreeSet<TilePosition> {
        let mut result = BTreeSet::new();
        for &center in &self.tiles {
            result.extend(tiles_in_radius(center, radius));
        }
        result
    }

    /// Whether an occupied tile lies within `radius` of `center`.
    pub fn occupied_within(&self, center: TilePosition, radius: u32) -> bool {
        let side = 2 * u64::from(radius) + 1;
        if (self.tiles.len() as u64) < side * side {
            self.tiles.iter().any(|tile| tile.chebyshev(center) <= radius)
        } else {
            tiles_in_radius(center, radius).any(|tile| self.tiles.contains(&tile))
        }
    }
}

/// All tiles within a square radius of a center tile.
pub fn tiles_in_radius(center: TilePosition, radius: u32) -> impl Iterator<Item = TilePosition> {
    let r = radius.min(i32::MAX as u32) as i32;
    (-r..=r).flat_map(move |dx| (-r..=r).map(move |dz| center.offset(dx, dz)))
}
