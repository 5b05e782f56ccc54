use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use fogwar_common::{ActorSample, TilePosition, VisibilityState};
use fogwar_kernel::{ActorRegistry, ApplyError, ApplyHandle, RebuildSink, VisibilityStore};

use crate::grid::ActorGrid;

/// Proximity configuration: how close an actor must be to reveal a tile, and
/// how far around actors tiles are re-examined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProximityConfig {
    /// Chebyshev radius (in tiles) around an actor that is revealed.
    pub check_radius: u32,
    /// Chebyshev radius (in tiles) around an actor that is examined each pass.
    pub scan_radius: u32,
    /// Time between scheduled passes.
    pub period: Duration,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            check_radius: 1,
            scan_radius: 2,
            period: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProximityError {
    #[error("check radius {check} exceeds scan radius {scan}")]
    RadiusOrder { check: u32, scan: u32 },
    #[error("pass period must be non-zero")]
    ZeroPeriod,
}

impl ProximityConfig {
    pub fn validate(&self) -> Result<(), ProximityError> {
        if self.check_radius > self.scan_radius {
            return Err(ProximityError::RadiusOrder {
                check: self.check_radius,
                scan: self.scan_radius,
            });
        }
        if self.period.is_zero() {
            return Err(ProximityError::ZeroPeriod);
        }
        Ok(())
    }
}

/// Minimal set of transitions one pass wants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProximityDelta {
    pub to_visible: BTreeSet<TilePosition>,
    pub to_fogged: BTreeSet<TilePosition>,
}

impl ProximityDelta {
    pub fn is_empty(&self) -> bool {
        self.to_visible.is_empty() && self.to_fogged.is_empty()
    }

    pub fn len(&self) -> usize {
        self.to_visible.len() + self.to_fogged.len()
    }
}

/// Per-pass statistics for instrumentation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifierStats {
    pub actors: usize,
    pub near_tiles: usize,
    pub to_visible: usize,
    pub to_fogged: usize,
    /// Tiles whose stored data actually changed.
    pub changed: usize,
    pub skipped: bool,
    pub pass_time: Duration,
}

/// Diff the desired proximity states of the tiles near `grid` against `state_of`.
///
/// A near tile with an actor within the check radius wants Visible. Any other
/// near tile wants Fogged only while it is Visible; Fogged and Hidden tiles
/// outside the check radius are left alone.
pub fn classify<F>(config: &ProximityConfig, grid: &ActorGrid, state_of: F) -> (ProximityDelta, usize)
where
    F: Fn(TilePosition) -> VisibilityState,
{
    let near = grid.tiles_near(config.scan_radius);
    let mut delta = ProximityDelta::default();
    for &tile in &near {
        let current = state_of(tile);
        if grid.occupied_within(tile, config.check_radius) {
            if current != VisibilityState::Visible {
                delta.to_visible.insert(tile);
            }
        } else if current == VisibilityState::Visible {
            delta.to_fogged.insert(tile);
        }
    }
    (delta, near.len())
}

/// Apply a delta, returning the tiles whose data changed.
pub fn apply_delta(store: &VisibilityStore, delta: &ProximityDelta) -> BTreeSet<TilePosition> {
    let visible = delta
        .to_visible
        .iter()
        .map(|&tile| store.set_state(tile, VisibilityState::Visible));
    let fogged = delta
        .to_fogged
        .iter()
        .map(|&tile| store.set_state(tile, VisibilityState::Fogged));
    visible.chain(fogged).filter(|t| t.changed()).map(|t| t.pos).collect()
}

/// Runs proximity passes and keeps their timing history.
pub struct ProximityClassifier {
    pub config: ProximityConfig,
    stats: ClassifierStats,
    timer: TickTimer,
    passes: u64,
}

impl ProximityClassifier {
    pub fn new(config: ProximityConfig) -> Self {
        Self {
            config,
            stats: ClassifierStats::default(),
            timer: TickTimer::new(64),
            passes: 0,
        }
    }

    /// One full pass: filter samples to tracked actors, then diff and apply on
    /// the apply thread so the pass never interleaves with a network batch.
    ///
    /// The sink hears about the changed tiles once, and only if there are any.
    pub fn pass(
        &mut self,
        samples: Vec<ActorSample>,
        registry: &ActorRegistry,
        apply: &ApplyHandle,
        sink: &dyn RebuildSink,
    ) -> Result<BTreeSet<TilePosition>, ApplyError> {
        let _span = tracing::info_span!("proximity_pass", pass = self.passes).entered();
        let start = Instant::now();
        self.passes += 1;

        let tracked = registry.tracked(samples);
        if tracked.is_empty() {
            self.stats = ClassifierStats {
                skipped: true,
                pass_time: start.elapsed(),
                ..ClassifierStats::default()
            };
            tracing::trace!("no tracked actors, pass skipped");
            return Ok(BTreeSet::new());
        }

        let grid = ActorGrid::from_samples(&tracked);
        let config = self.config;
        let (delta, near_tiles, changed) = apply.run(move |store| {
            let (delta, near_tiles) = classify(&config, &grid, |tile| store.get_state(tile));
            let changed = apply_delta(store, &delta);
            (delta, near_tiles, changed)
        })?;

        if !changed.is_empty() {
            sink.tiles_changed(&changed);
        }

        let pass_time = start.elapsed();
        self.timer.record(pass_time);
        self.stats = ClassifierStats {
            actors: tracked.len(),
            near_tiles,
            to_visible: delta.to_visible.len(),
            to_fogged: delta.to_fogged.len(),
            changed: changed.len(),
            skipped: false,
            pass_time,
        };

        tracing::debug!(
            actors = tracked.len(),
            near = near_tiles,
            to_visible = delta.to_visible.len(),
            to_fogged = delta.to_fogged.len(),
            ?pass_time,
            "proximity pass complete"
        );

        Ok(changed)
    }

    /// Statistics from the last pass.
    pub fn stats(&self) -> &ClassifierStats {
        &self.stats
    }

    pub fn timer(&self) -> &TickTimer {
        &self.timer
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }
}

/// Pass time tracker for instrumentation.
#[derive(Debug, Clone)]
pub struct TickTimer {
    history: Vec<Duration>,
    capacity: usize,
    index: usize,
    filled: bool,
}

impl TickTimer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: vec![Duration::ZERO; capacity],
            capacity,
            index: 0,
            filled: false,
        }
    }

    pub fn record(&mut self, dt: Duration) {
        self.history[self.index] = dt;
        self.index = (self.index + 1) % self.capacity;
        if self.index == 0 {
            self.filled = true;
        }
    }

    fn recorded(&self) -> &[Duration] {
        &self.history[..self.count()]
    }

    pub fn average(&self) -> Duration {
        let count = self.count();
        if count == 0 {
            return Duration::ZERO;
        }
        let total: Duration = self.recorded().iter().sum();
        total / count as u32
    }

    pub fn max(&self) -> Duration {
        self.recorded().iter().copied().max().unwrap_or(Duration::ZERO)
    }

    pub fn min(&self) -> Duration {
        self.recorded().iter().copied().min().unwrap_or(Duration::ZERO)
    }

    pub fn count(&self) -> usize {
        if self.filled {
            self.capacity
        } else {
            self.index
        }
    }
}
