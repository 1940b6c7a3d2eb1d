//! Real-time slot estimation from a stream of slot-tick events.
//!
//! Tracks recent ticks and estimates the current slot with a median-based
//! filter so a single malicious or misconfigured validator broadcasting a
//! far-future slot cannot yank the estimate forward.

use std::collections::VecDeque;

use crate::model::Slot;

/// Maximum slot skip distance tolerated before a tick is treated as an
/// outlier rather than genuine progress.
pub const MAX_SLOT_SKIP_DISTANCE: u64 = 48;

/// Number of recent ticks kept for estimation.
pub const RECENT_SLOTS_CAPACITY: usize = 48;

/// Tracks recent slot ticks and estimates the current slot.
#[derive(Debug)]
pub struct SlotsTracker {
    recent: VecDeque<Slot>,
    current_slot: Slot,
}

impl SlotsTracker {
    /// Creates a new, empty slots tracker.
    pub fn new() -> Self {
        Self {
            recent: VecDeque::with_capacity(RECENT_SLOTS_CAPACITY),
            current_slot: 0,
        }
    }

    /// Returns the current estimated slot.
    pub fn current_slot(&self) -> Slot {
        self.current_slot
    }

    /// Records a slot tick and returns the new current slot estimate.
    pub fn record(&mut self, slot: Slot) -> Slot {
        self.recent.push_back(slot);
        if self.recent.len() > RECENT_SLOTS_CAPACITY {
            let excess = self.recent.len() - RECENT_SLOTS_CAPACITY;
            self.recent.drain(..excess);
        }
        self.current_slot = self.estimate_current_slot();
        self.current_slot
    }

    /// Forcibly sets the current slot from an out-of-band source (e.g. a
    /// fallback `getSlot` poll), bypassing outlier filtering. Used when
    /// the tick stream has gone stale.
    pub fn force_set(&mut self, slot: Slot) -> Slot {
        if slot <= self.current_slot {
            return self.current_slot;
        }
        self.current_slot = slot;
        self.recent.clear();
        self.recent.push_back(slot);
        self.current_slot
    }

    /// Estimates the current slot using a median-based outlier filter.
    fn estimate_current_slot(&self) -> Slot {
        if self.recent.is_empty() {
            return self.current_slot;
        }

        let mut sorted: Vec<Slot> = self.recent.iter().copied().collect();
        sorted.sort_unstable();

        let max_idx = sorted.len() - 1;
        let median_idx = max_idx / 2;
        let median_slot = sorted[median_idx];
        let expected_current = median_slot + (max_idx - median_idx) as u64;
        let max_reasonable = expected_current + MAX_SLOT_SKIP_DISTANCE;

        sorted
            .iter()
            .rev()
            .find(|&&s| s <= max_reasonable)
            .copied()
            .unwrap_or(median_slot)
    }
}

impl Default for SlotsTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_from_slots(slots: Vec<Slot>) -> SlotsTracker {
        let mut tracker = SlotsTracker::new();
        for slot in slots {
            tracker.record(slot);
        }
        tracker
    }

    #[test]
    fn sequential_ticks_track_the_latest_slot() {
        let tracker = tracker_from_slots((1..=12).collect());
        assert_eq!(tracker.current_slot(), 12);
    }

    #[test]
    fn reordered_ticks_still_converge() {
        let tracker = tracker_from_slots((1..=12).rev().collect());
        assert_eq!(tracker.current_slot(), 12);
    }

    #[test]
    fn record_updates_the_estimate_incrementally() {
        let mut tracker = SlotsTracker::new();
        assert_eq!(tracker.record(13), 13);
        assert_eq!(tracker.record(14), 14);
    }

    #[test]
    fn far_future_outliers_are_rejected() {
        let tracker = tracker_from_slots(vec![1, 100]);
        assert_eq!(tracker.current_slot(), 1);

        let tracker = tracker_from_slots(vec![1, 2, 100]);
        assert_eq!(tracker.current_slot(), 2);
    }

    #[test]
    fn force_set_ignores_values_not_ahead_of_current() {
        let mut tracker = tracker_from_slots(vec![10]);
        assert_eq!(tracker.force_set(5), 10);
        assert_eq!(tracker.force_set(20), 20);
        assert_eq!(tracker.current_slot(), 20);
    }
}
