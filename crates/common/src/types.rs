use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Edge length of a tile in voxels, on both ground-plane axes.
pub const TILE_SIZE: i32 = 16;

/// Voxels in one horizontal layer of a tile.
pub const TILE_AREA: usize = (TILE_SIZE * TILE_SIZE) as usize;

/// State reported for any tile the store holds no entry for.
///
/// Visible tiles are the overwhelming majority, so they are the ones that cost
/// nothing to store. Stores can be configured for `Hidden` instead; every read
/// path goes through the store's policy, never through this constant directly.
pub const DEFAULT_STATE: VisibilityState = VisibilityState::Visible;

/// Identifies a tile: a 16x16 column spanning the full vertical extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TilePosition {
    pub x: i32,
    pub z: i32,
}

impl TilePosition {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Tile containing a continuous world position.
    pub fn from_world(world_x: f64, world_z: f64) -> Self {
        Self::from_block(world_x.floor() as i32, world_z.floor() as i32)
    }

    /// Tile containing an integer voxel coordinate.
    pub const fn from_block(block_x: i32, block_z: i32) -> Self {
        Self {
            x: block_x >> 4,
            z: block_z >> 4,
        }
    }

    /// Chebyshev (chessboard) distance in tiles.
    pub fn chebyshev(self, other: TilePosition) -> u32 {
        self.x.abs_diff(other.x).max(self.z.abs_diff(other.z))
    }

    pub fn offset(self, dx: i32, dz: i32) -> Self {
        Self {
            x: self.x.saturating_add(dx),
            z: self.z.saturating_add(dz),
        }
    }

    /// World coordinates of the tile's minimum corner voxel.
    pub fn origin_block(self) -> (i32, i32) {
        (self.x.wrapping_mul(TILE_SIZE), self.z.wrapping_mul(TILE_SIZE))
    }
}

impl fmt::Display for TilePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// Tri-state visibility classification of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VisibilityState {
    /// Renders live data. Holds no override and no snapshot.
    Visible,
    /// Renders frozen data from its snapshot, default fill elsewhere.
    Fogged,
    /// Treated as absent by collaborators. Holds no override and no snapshot.
    Hidden,
}

impl VisibilityState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Visible => "VISIBLE",
            Self::Fogged => "FOGGED",
            Self::Hidden => "HIDDEN",
        }
    }
}

impl Default for VisibilityState {
    fn default() -> Self {
        DEFAULT_STATE
    }
}

impl fmt::Display for VisibilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown visibility state name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown visibility state: {0:?}")]
pub struct ParseStateError(pub String);

impl FromStr for VisibilityState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "VISIBLE" => Ok(Self::Visible),
            "FOGGED" => Ok(Self::Fogged),
            "HIDDEN" => Ok(Self::Hidden),
            _ => Err(ParseStateError(s.to_string())),
        }
    }
}

/// What the live world reports about a single voxel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VoxelSample {
    pub solid: bool,
    pub liquid: bool,
}

impl VoxelSample {
    pub const EMPTY: Self = Self {
        solid: false,
        liquid: false,
    };
    pub const SOLID: Self = Self {
        solid: true,
        liquid: false,
    };
    pub const LIQUID: Self = Self {
        solid: false,
        liquid: true,
    };
}

/// Occupancy class stored per voxel in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VoxelClass {
    Empty = 0,
    Solid = 1,
    Liquid = 2,
}

impl VoxelClass {
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Empty),
            1 => Some(Self::Solid),
            2 => Some(Self::Liquid),
            _ => None,
        }
    }
}

impl From<VoxelSample> for VoxelClass {
    /// Liquid wins over solid, solid over empty (waterlogged blocks read as liquid).
    fn from(sample: VoxelSample) -> Self {
        if sample.liquid {
            Self::Liquid
        } else if sample.solid {
            Self::Solid
        } else {
            Self::Empty
        }
    }
}

/// Result of a point query against a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoxelQuery {
    Empty,
    Solid,
    Liquid,
    /// The Y coordinate lies outside the bounds recorded with the snapshot,
    /// or there is no snapshot to answer from.
    OutOfRange,
}

impl VoxelQuery {
    pub fn class(self) -> Option<VoxelClass> {
        match self {
            Self::Empty => Some(VoxelClass::Empty),
            Self::Solid => Some(VoxelClass::Solid),
            Self::Liquid => Some(VoxelClass::Liquid),
            Self::OutOfRange => None,
        }
    }
}

impl From<VoxelClass> for VoxelQuery {
    fn from(class: VoxelClass) -> Self {
        match class {
            VoxelClass::Empty => Self::Empty,
            VoxelClass::Solid => Self::Solid,
            VoxelClass::Liquid => Self::Liquid,
        }
    }
}

/// Vertical extent of the world: `height` voxels starting at `bottom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct HeightBounds {
    pub bottom: i32,
    pub height: u32,
}

impl HeightBounds {
    pub const fn new(bottom: i32, height: u32) -> Self {
        Self { bottom, height }
    }

    /// Offset of `y` above `bottom`, or `None` when outside the bounds.
    pub fn rel_y(&self, y: i32) -> Option<u32> {
        let rel = i64::from(y) - i64::from(self.bottom);
        if rel >= 0 && rel < i64::from(self.height) {
            Some(rel as u32)
        } else {
            None
        }
    }

    pub fn contains(&self, y: i32) -> bool {
        self.rel_y(y).is_some()
    }

    /// Exclusive upper Y bound.
    pub fn top(&self) -> i64 {
        i64::from(self.bottom) + i64::from(self.height)
    }

    /// Voxels in one tile column of this height.
    pub fn tile_voxels(&self) -> usize {
        self.height as usize * TILE_AREA
    }
}

/// Token naming the material used to draw a non-visible tile.
///
/// Always a namespaced identifier (`namespace:path`). Tokens without a
/// namespace are read as `minecraft:<path>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FogAppearance(String);

/// Appearance token that cannot be resolved to an identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppearanceError {
    #[error("empty appearance token")]
    Empty,
    #[error("invalid appearance token {0:?}")]
    Invalid(String),
}

impl FogAppearance {
    const DEFAULT_NAMESPACE: &'static str = "minecraft";

    pub fn parse(token: &str) -> Result<Self, AppearanceError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AppearanceError::Empty);
        }
        let (namespace, path) = match token.split_once(':') {
            Some((ns, path)) => (ns, path),
            None => (Self::DEFAULT_NAMESPACE, token),
        };
        let ns_ok = !namespace.is_empty()
            && namespace
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b"_-.".contains(&b));
        let path_ok = !path.is_empty()
            && path
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b"_-./".contains(&b));
        if !ns_ok || !path_ok {
            return Err(AppearanceError::Invalid(token.to_string()));
        }
        Ok(Self(format!("{namespace}:{path}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn namespace(&self) -> &str {
        self.0.split_once(':').map_or("", |(ns, _)| ns)
    }

    pub fn path(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(_, path)| path)
    }
}

impl Default for FogAppearance {
    fn default() -> Self {
        Self("minecraft:gray_concrete".to_string())
    }
}

impl fmt::Display for FogAppearance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for FogAppearance {
    type Error = AppearanceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FogAppearance> for String {
    fn from(value: FogAppearance) -> Self {
        value.0
    }
}

/// Identity of an actor whose position drives proximity classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub Uuid);

impl ActorId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl Default for ActorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One actor position read from the actor feed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActorSample {
    pub id: ActorId,
    pub position: DVec3,
}

impl ActorSample {
    /// Sample on the ground plane; the classifier ignores Y.
    pub fn at(id: ActorId, world_x: f64, world_z: f64) -> Self {
        Self {
            id,
            position: DVec3::new(world_x, 0.0, world_z),
        }
    }

    pub fn tile(&self) -> TilePosition {
        TilePosition::from_world(self.position.x, self.position.z)
    }
}
