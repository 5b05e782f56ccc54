//! Proximity: which tiles tracked actors can currently see.
//!
//! # Invariants
//! - Only tiles within the scan radius of a tracked actor are examined.
//! - A pass diffs and applies as one job on the apply queue.
//! - The rebuild sink is told once per pass, and never about an empty set.

mod classifier;
mod grid;
mod scheduler;

pub use classifier::{
    ClassifierStats, ProximityClassifier, ProximityConfig, ProximityDelta, ProximityError,
    TickTimer, apply_delta, classify,
};
pub use grid::{ActorGrid, tiles_in_radius};
pub use scheduler::{ClassifierScheduler, PassInputs, PassTrigger, SchedulerStats};
