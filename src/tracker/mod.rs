//! Leader tracking module for TPU transaction routing.
//!
//! This module provides real-time tracking of:
//! - Current slot via the cluster's slot subscription
//! - Leader schedule per epoch
//! - Validator TPU socket addresses
//!
//! The components work together to determine which validator should
//! receive transactions at any given moment.

mod leader;
mod slots;
mod snapshot;

pub use leader::{HintSink, LeaderTracker};
pub use slots::{SlotsTracker, MAX_SLOT_SKIP_DISTANCE, RECENT_SLOTS_CAPACITY};
pub use snapshot::TrackerSnapshot;
