//! Frozen voxel classification of one tile column.
//!
//! Layout is y-major: `index = rel_y * 256 + rel_x * 16 + rel_z`, one byte per
//! voxel holding a [`VoxelClass`]. The byte form prefixes the data with the
//! bounds (`bottom: i32 LE`, `height: u32 LE`).

use crate::collab::{VoxelReader, WorldReadError};
use fogwar_common::{HeightBounds, TILE_AREA, TILE_SIZE, TilePosition, VoxelClass, VoxelQuery};
use std::fmt;

/// Tallest world a snapshot may describe.
pub const MAX_SNAPSHOT_HEIGHT: u32 = 4096;

const HEADER_LEN: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("world read failed at ({x}, {y}, {z}): {source}")]
    Read {
        x: i32,
        y: i32,
        z: i32,
        #[source]
        source: WorldReadError,
    },
    #[error("world height {0} exceeds the snapshot limit of {MAX_SNAPSHOT_HEIGHT}")]
    TooTall(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot header truncated: {0} bytes")]
    Truncated(usize),
    #[error("snapshot height {0} exceeds the limit of {MAX_SNAPSHOT_HEIGHT}")]
    TooTall(u32),
    #[error("snapshot length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Per-class voxel totals of a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoxelCounts {
    pub empty: usize,
    pub solid: usize,
    pub liquid: usize,
    /// Bytes that do not decode to a class.
    pub unknown: usize,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Snapshot {
    bounds: HeightBounds,
    data: Box<[u8]>,
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("bounds", &self.bounds)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Snapshot {
    /// Classify every voxel of `tile` between the bounds.
    ///
    /// A single failed read aborts the whole capture.
    pub fn capture(
        tile: TilePosition,
        bounds: HeightBounds,
        reader: &dyn VoxelReader,
    ) -> Result<Self, CaptureError> {
        if bounds.height > MAX_SNAPSHOT_HEIGHT {
            return Err(CaptureError::TooTall(bounds.height));
        }

        let (origin_x, origin_z) = tile.origin_block();
        let mut data = vec![0u8; bounds.tile_voxels()];
        for rel_y in 0..bounds.height {
            let y = bounds.bottom.wrapping_add(rel_y as i32);
            for rel_x in 0..TILE_SIZE {
                for rel_z in 0..TILE_SIZE {
                    let (x, z) = (origin_x + rel_x, origin_z + rel_z);
                    let class = reader
                        .classify(x, y, z)
                        .map_err(|source| CaptureError::Read { x, y, z, source })?;
                    data[Self::index(rel_y, rel_x as u32, rel_z as u32)] = class.to_byte();
                }
            }
        }

        Ok(Self {
            bounds,
            data: data.into_boxed_slice(),
        })
    }

    /// Build from already-classified bytes.
    pub fn from_parts(bounds: HeightBounds, data: Vec<u8>) -> Result<Self, SnapshotError> {
        if bounds.height > MAX_SNAPSHOT_HEIGHT {
            return Err(SnapshotError::TooTall(bounds.height));
        }
        let expected = bounds.tile_voxels();
        if data.len() != expected {
            return Err(SnapshotError::LengthMismatch {
                expected: HEADER_LEN + expected,
                actual: HEADER_LEN + data.len(),
            });
        }
        Ok(Self {
            bounds,
            data: data.into_boxed_slice(),
        })
    }

    #[inline]
    pub fn index(rel_y: u32, rel_x: u32, rel_z: u32) -> usize {
        rel_y as usize * TILE_AREA + rel_x as usize * TILE_SIZE as usize + rel_z as usize
    }

    pub fn bounds(&self) -> HeightBounds {
        self.bounds
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Classification of the voxel at world coordinates.
    ///
    /// X and Z are reduced into the tile, so callers must route by tile first.
    pub fn query(&self, world_x: i32, world_y: i32, world_z: i32) -> VoxelQuery {
        let Some(rel_y) = self.bounds.rel_y(world_y) else {
            return VoxelQuery::OutOfRange;
        };
        let index = Self::index(rel_y, (world_x & 15) as u32, (world_z & 15) as u32);
        let byte = self.data.get(index).copied().unwrap_or_default();
        match VoxelClass::from_byte(byte) {
            Some(class) => class.into(),
            None => {
                tracing::trace!(byte, world_x, world_y, world_z, "unknown snapshot byte, reading as empty");
                VoxelQuery::Empty
            }
        }
    }

    pub fn counts(&self) -> VoxelCounts {
        let mut counts = VoxelCounts::default();
        for &byte in self.data.iter() {
            match VoxelClass::from_byte(byte) {
                Some(VoxelClass::Empty) => counts.empty += 1,
                Some(VoxelClass::Solid) => counts.solid += 1,
                Some(VoxelClass::Liquid) => counts.liquid += 1,
                None => counts.unknown += 1,
            }
        }
        counts
    }

    /// Size of the byte form.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.data.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.bounds.bottom.to_le_bytes());
        out.extend_from_slice(&self.bounds.height.to_le_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SnapshotError> {
        if bytes.len() < HEADER_LEN {
            return Err(SnapshotError::Truncated(bytes.len()));
        }
        let (header, data) = bytes.split_at(HEADER_LEN);
        let bottom = i32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let height = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        Self::from_parts(HeightBounds::new(bottom, height), data.to_vec())
    }
}
