//! Authoritative per-tile visibility state.
//!
//! # Invariants
//!
//! - A tile is absent from the state map exactly when it is in the policy
//!   default state.
//! - An override or snapshot exists only for a tile whose state is Fogged.
//! - The three maps for a tile live in one shard and change under one write
//!   lock, so readers never observe a half-applied transition.

use crate::collab::VoxelReader;
use crate::snapshot::Snapshot;
use fogwar_common::{DEFAULT_STATE, FogAppearance, TilePosition, VisibilityState};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

pub const SHARD_COUNT: usize = 16;

/// The state a tile has when nothing is stored for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorePolicy {
    default_state: VisibilityState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{0} cannot be the default state")]
pub struct PolicyError(pub VisibilityState);

impl StorePolicy {
    /// Fogged tiles carry data, so only Visible or Hidden can be implicit.
    pub fn new(default_state: VisibilityState) -> Result<Self, PolicyError> {
        match default_state {
            VisibilityState::Fogged => Err(PolicyError(default_state)),
            _ => Ok(Self { default_state }),
        }
    }

    pub fn default_state(&self) -> VisibilityState {
        self.default_state
    }
}

impl Default for StorePolicy {
    fn default() -> Self {
        Self {
            default_state: DEFAULT_STATE,
        }
    }
}

/// Result of a single-tile write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub pos: TilePosition,
    pub previous: VisibilityState,
    pub current: VisibilityState,
    /// Override or snapshot changed even if the state did not.
    pub data_changed: bool,
}

impl Transition {
    fn unchanged(pos: TilePosition, state: VisibilityState) -> Self {
        Self {
            pos,
            previous: state,
            current: state,
            data_changed: false,
        }
    }

    pub fn changed(&self) -> bool {
        self.previous != self.current || self.data_changed
    }
}

/// One element of a batch write.
#[derive(Debug, Clone, PartialEq)]
pub struct TileUpdate {
    pub pos: TilePosition,
    pub state: VisibilityState,
    /// Tile override; `None` means the process default.
    pub appearance: Option<FogAppearance>,
    /// Authority-supplied snapshot replacing any local capture.
    pub snapshot: Option<Arc<Snapshot>>,
}

impl TileUpdate {
    pub fn new(pos: TilePosition, state: VisibilityState) -> Self {
        Self {
            pos,
            state,
            appearance: None,
            snapshot: None,
        }
    }

    pub fn with_appearance(mut self, appearance: FogAppearance) -> Self {
        self.appearance = Some(appearance);
        self
    }

    pub fn with_snapshot(mut self, snapshot: Arc<Snapshot>) -> Self {
        self.snapshot = Some(snapshot);
        self
    }
}

/// Everything stored for one tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TileEntry {
    pub pos: TilePosition,
    pub state: VisibilityState,
    pub appearance: Option<FogAppearance>,
    pub snapshot: Option<Arc<Snapshot>>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntryError {
    #[error("tile {0} is stored in the default state")]
    DefaultState(TilePosition),
    #[error("tile {0} carries fog data but is not fogged")]
    DataOnUnfogged(TilePosition),
    #[error("tile {0} appears more than once")]
    Duplicate(TilePosition),
}

impl TileEntry {
    pub fn validate(&self, policy: StorePolicy) -> Result<(), EntryError> {
        if self.state == policy.default_state() {
            return Err(EntryError::DefaultState(self.pos));
        }
        if self.state != VisibilityState::Fogged
            && (self.appearance.is_some() || self.snapshot.is_some())
        {
            return Err(EntryError::DataOnUnfogged(self.pos));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Stored (non-default) tiles.
    pub tiles: usize,
    pub fogged: usize,
    pub hidden: usize,
    pub visible: usize,
    pub overrides: usize,
    pub snapshots: usize,
    pub snapshot_bytes: usize,
}

#[derive(Default)]
struct Shard {
    states: HashMap<TilePosition, VisibilityState>,
    overrides: HashMap<TilePosition, FogAppearance>,
    snapshots: HashMap<TilePosition, Arc<Snapshot>>,
}

impl Shard {
    fn state(&self, pos: &TilePosition, default: VisibilityState) -> VisibilityState {
        self.states.get(pos).copied().unwrap_or(default)
    }

    fn remove(&mut self, pos: &TilePosition) {
        self.states.remove(pos);
        self.overrides.remove(pos);
        self.snapshots.remove(pos);
    }

    fn clear(&mut self) {
        self.states.clear();
        self.overrides.clear();
        self.snapshots.clear();
    }
}

pub struct VisibilityStore {
    shards: Box<[RwLock<Shard>]>,
    policy: StorePolicy,
    default_appearance: RwLock<FogAppearance>,
    world: RwLock<Option<Arc<dyn VoxelReader>>>,
}

impl Default for VisibilityStore {
    fn default() -> Self {
        Self::new(StorePolicy::default())
    }
}

impl VisibilityStore {
    pub fn new(policy: StorePolicy) -> Self {
        let shards = (0..SHARD_COUNT).map(|_| RwLock::new(Shard::default())).collect();
        Self {
            shards,
            policy,
            default_appearance: RwLock::new(FogAppearance::default()),
            world: RwLock::new(None),
        }
    }

    pub fn policy(&self) -> StorePolicy {
        self.policy
    }

    fn shard(&self, pos: &TilePosition) -> &RwLock<Shard> {
        let hash = (pos.x as u32).wrapping_mul(0x9E37_79B1) ^ (pos.z as u32).wrapping_mul(0x85EB_CA77);
        &self.shards[(hash >> 7) as usize % SHARD_COUNT]
    }

    pub fn attach_world(&self, reader: Arc<dyn VoxelReader>) {
        *self.world.write() = Some(reader);
    }

    pub fn detach_world(&self) {
        *self.world.write() = None;
    }

    pub fn has_world(&self) -> bool {
        self.world.read().is_some()
    }

    pub fn default_appearance(&self) -> FogAppearance {
        self.default_appearance.read().clone()
    }

    /// Tiles without an override pick up the new value immediately.
    pub fn set_default_appearance(&self, appearance: FogAppearance) {
        *self.default_appearance.write() = appearance;
    }

    pub fn get_state(&self, pos: TilePosition) -> VisibilityState {
        self.shard(&pos).read().state(&pos, self.policy.default_state())
    }

    pub fn get_fog_override(&self, pos: TilePosition) -> FogAppearance {
        match self.shard(&pos).read().overrides.get(&pos) {
            Some(appearance) => appearance.clone(),
            None => self.default_appearance(),
        }
    }

    /// The tile's own override, without default substitution.
    pub fn tile_override(&self, pos: TilePosition) -> Option<FogAppearance> {
        self.shard(&pos).read().overrides.get(&pos).cloned()
    }

    pub fn get_snapshot(&self, pos: TilePosition) -> Option<Arc<Snapshot>> {
        self.shard(&pos).read().snapshots.get(&pos).cloned()
    }

    /// State, override and snapshot of one tile, read under one lock.
    pub fn tile(&self, pos: TilePosition) -> TileEntry {
        let shard = self.shard(&pos).read();
        TileEntry {
            pos,
            state: shard.state(&pos, self.policy.default_state()),
            appearance: shard.overrides.get(&pos).cloned(),
            snapshot: shard.snapshots.get(&pos).cloned(),
        }
    }

    pub fn set_state(&self, pos: TilePosition, state: VisibilityState) -> Transition {
        let current = self.get_state(pos);
        if current == state {
            return Transition::unchanged(pos, current);
        }
        self.apply_update(TileUpdate::new(pos, state))
    }

    pub fn apply_update(&self, update: TileUpdate) -> Transition {
        let TileUpdate {
            pos,
            state,
            appearance,
            snapshot,
        } = update;
        let default = self.policy.default_state();

        if state != VisibilityState::Fogged {
            if appearance.is_some() || snapshot.is_some() {
                tracing::debug!(%pos, %state, "ignoring fog data for a non-fogged target");
            }
            let mut shard = self.shard(&pos).write();
            let previous = shard.state(&pos, default);
            if previous == state {
                return Transition::unchanged(pos, previous);
            }
            shard.overrides.remove(&pos);
            shard.snapshots.remove(&pos);
            if state == default {
                shard.states.remove(&pos);
            } else {
                shard.states.insert(pos, state);
            }
            tracing::trace!(%pos, %previous, %state, "tile transition");
            return Transition {
                pos,
                previous,
                current: state,
                data_changed: true,
            };
        }

        let appearance = appearance.filter(|a| *a != *self.default_appearance.read());
        let (previous, has_snapshot) = {
            let shard = self.shard(&pos).read();
            (shard.state(&pos, default), shard.snapshots.contains_key(&pos))
        };

        // Capture reads the world, so it must not hold the shard lock.
        let captured = if snapshot.is_none() && !has_snapshot {
            self.capture(pos).map(Arc::new)
        } else {
            None
        };

        let mut shard = self.shard(&pos).write();
        let previous_now = shard.state(&pos, default);
        let mut data_changed = previous_now != VisibilityState::Fogged;
        shard.states.insert(pos, VisibilityState::Fogged);

        if shard.overrides.get(&pos) != appearance.as_ref() {
            data_changed = true;
            match appearance {
                Some(appearance) => {
                    shard.overrides.insert(pos, appearance);
                }
                None => {
                    shard.overrides.remove(&pos);
                }
            }
        }

        match snapshot {
            Some(snapshot) => {
                if shard.snapshots.get(&pos) != Some(&snapshot) {
                    shard.snapshots.insert(pos, snapshot);
                    data_changed = true;
                }
            }
            None => {
                if let Some(captured) = captured {
                    // A concurrent writer may have installed one meanwhile.
                    if !shard.snapshots.contains_key(&pos) {
                        shard.snapshots.insert(pos, captured);
                        data_changed = true;
                    }
                }
            }
        }

        if previous != previous_now {
            tracing::trace!(%pos, %previous, %previous_now, "tile changed during capture");
        }
        tracing::trace!(%pos, previous = %previous_now, "tile fogged");
        Transition {
            pos,
            previous: previous_now,
            current: VisibilityState::Fogged,
            data_changed,
        }
    }

    fn capture(&self, pos: TilePosition) -> Option<Snapshot> {
        let Some(world) = self.world.read().clone() else {
            tracing::warn!(%pos, "no world attached, fogging without snapshot");
            return None;
        };
        let bounds = world.height_bounds();
        match Snapshot::capture(pos, bounds, world.as_ref()) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                tracing::warn!(%pos, error = %err, "snapshot capture failed, fogging without snapshot");
                None
            }
        }
    }

    /// Apply every update in order and return the tiles that changed.
    pub fn apply_batch<I>(&self, updates: I) -> BTreeSet<TilePosition>
    where
        I: IntoIterator<Item = TileUpdate>,
    {
        updates
            .into_iter()
            .map(|update| self.apply_update(update))
            .filter(Transition::changed)
            .map(|t| t.pos)
            .collect()
    }

    /// Revert every stored tile not in `keep` to the default state.
    pub fn apply_reset(&self, keep: &HashSet<TilePosition>) -> BTreeSet<TilePosition> {
        let mut removed = BTreeSet::new();
        for shard in self.shards.iter() {
            let mut shard = shard.write();
            let stale: Vec<TilePosition> = shard
                .states
                .keys()
                .filter(|pos| !keep.contains(pos))
                .copied()
                .collect();
            for pos in stale {
                shard.remove(&pos);
                removed.insert(pos);
            }
        }
        removed
    }

    pub fn clear_all(&self) {
        for shard in self.shards.iter() {
            shard.write().clear();
        }
    }

    /// Clear, then install `entries`. Nothing is installed unless every entry
    /// is valid under this store's policy.
    pub fn replace_all(&self, entries: Vec<TileEntry>) -> Result<(), EntryError> {
        let mut seen = HashSet::with_capacity(entries.len());
        for entry in &entries {
            entry.validate(self.policy)?;
            if !seen.insert(entry.pos) {
                return Err(EntryError::Duplicate(entry.pos));
            }
        }

        self.clear_all();
        for entry in entries {
            let mut shard = self.shard(&entry.pos).write();
            shard.states.insert(entry.pos, entry.state);
            if let Some(appearance) = entry.appearance {
                shard.overrides.insert(entry.pos, appearance);
            }
            if let Some(snapshot) = entry.snapshot {
                shard.snapshots.insert(entry.pos, snapshot);
            }
        }
        Ok(())
    }

    /// Copy of every stored tile, sorted by position.
    ///
    /// Each shard is read under its own lock.
    pub fn entries(&self) -> Vec<TileEntry> {
        let mut out = Vec::new();
        for shard in self.shards.iter() {
            let shard = shard.read();
            out.extend(shard.states.iter().map(|(&pos, &state)| TileEntry {
                pos,
                state,
                appearance: shard.overrides.get(&pos).cloned(),
                snapshot: shard.snapshots.get(&pos).cloned(),
            }));
        }
        out.sort_by_key(|entry| entry.pos);
        out
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().states.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().states.is_empty())
    }

    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats::default();
        for shard in self.shards.iter() {
            let shard = shard.read();
            stats.tiles += shard.states.len();
            for state in shard.states.values() {
                match state {
                    VisibilityState::Fogged => stats.fogged += 1,
                    VisibilityState::Hidden => stats.hidden += 1,
                    VisibilityState::Visible => stats.visible += 1,
                }
            }
            stats.overrides += shard.overrides.len();
            stats.snapshots += shard.snapshots.len();
            stats.snapshot_bytes += shard.snapshots.values().map(|s| s.data().len()).sum::<usize>();
        }
        stats
    }
}
