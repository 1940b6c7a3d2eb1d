//! Immutable tracker state, swapped atomically on epoch rotation.
//!
//! `EpochInfo`, the SlotMap, and the cluster-nodes index are bundled into
//! one value so readers never observe a partially-rotated state: the
//! slot worker and the dispatcher's query path each see either the
//! pre- or post-rotation snapshot, never a mix.

use std::collections::HashMap;

use log::warn;

use crate::model::{Leader, LeaderSchedule, Slot};

/// One epoch's relative-slot → leader mapping, plus the bookkeeping
/// needed to detect the next rotation and serve queries.
#[derive(Debug, Clone)]
pub struct TrackerSnapshot {
    /// Absolute slot at which the current epoch began.
    pub epoch_start: Slot,
    /// Absolute slot at which the next epoch begins.
    pub next_epoch_start: Slot,
    /// Length of an epoch, in slots.
    pub slots_in_epoch: Slot,
    /// Relative slot index → Leader, for the current epoch only.
    pub slot_map: HashMap<usize, Leader>,
    /// Raw pubkey → relative-slot-indices schedule for the current epoch.
    /// Retained (not just the resolved `slot_map`) so a later cluster-nodes
    /// refresh can rebuild `slot_map` without re-fetching the schedule.
    pub curr_schedule: LeaderSchedule,
    /// Raw pubkey → relative-slot-indices schedule for the *next* epoch,
    /// prefetched so rotation never blocks on an RPC round trip.
    pub next_schedule: LeaderSchedule,
    /// Current cluster-nodes snapshot, keyed by pubkey.
    pub nodes: HashMap<String, Leader>,
}

impl TrackerSnapshot {
    /// Builds the relative-slot → Leader map from a raw schedule and the
    /// current cluster-nodes index.
    ///
    /// An entry whose leader pubkey is not present in `nodes` is dropped
    /// and logged rather than included with a dangling reference.
    pub fn build_slot_map(
        schedule: &LeaderSchedule,
        nodes: &HashMap<String, Leader>,
    ) -> HashMap<usize, Leader> {
        let mut slot_map = HashMap::with_capacity(schedule.len() * 4);
        let mut missing = 0usize;

        for (pubkey, slots) in schedule {
            match nodes.get(pubkey) {
                Some(leader) => {
                    for &slot in slots {
                        slot_map.insert(slot as usize, leader.clone());
                    }
                }
                None => {
                    missing += 1;
                }
            }
        }

        if missing > 0 {
            warn!(
                "{missing} leader(s) in schedule have no matching cluster-nodes entry; slots dropped"
            );
        }

        slot_map
    }

    /// Relative slot of the most recently observed absolute slot.
    pub fn relative_slot(&self, absolute: Slot) -> Option<Slot> {
        absolute.checked_sub(self.epoch_start)
    }

    /// `current_leader(offset)` query: the leader at `relative + offset`
    /// and its absolute slot, or `None` if the SlotMap has no entry.
    pub fn leader_at(&self, relative: Slot, offset: Slot) -> Option<(Leader, Slot)> {
        let target = relative.checked_add(offset)?;
        let leader = self.slot_map.get(&(target as usize))?.clone();
        Some((leader, target + self.epoch_start))
    }

    /// Finds the nearest upcoming distinct leader at or after `from`,
    /// within the current epoch; if none exists before the epoch boundary,
    /// falls back to the first distinct leader found scanning the SlotMap
    /// in ascending slot-index order (deterministic, rather than relying
    /// on hash-map iteration order, which is unspecified).
    pub fn next_distinct_leader(&self, from: Slot) -> Option<(usize, Leader)> {
        let current = self.slot_map.get(&(from as usize))?;

        for i in from..self.slots_in_epoch {
            if let Some(leader) = self.slot_map.get(&(i as usize)) {
                if leader.pubkey != current.pubkey {
                    return Some((i as usize, leader.clone()));
                }
            }
        }

        let mut indices: Vec<usize> = self.slot_map.keys().copied().collect();
        indices.sort_unstable();
        for i in indices {
            let leader = &self.slot_map[&i];
            if leader.pubkey != current.pubkey {
                return Some((i, leader.clone()));
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leader(pubkey: &str) -> Leader {
        Leader {
            pubkey: pubkey.to_string(),
            tpu: None,
            tpu_quic: None,
            tpu_forwards: None,
            tpu_forwards_quic: None,
        }
    }

    fn nodes(pubkeys: &[&str]) -> HashMap<String, Leader> {
        pubkeys
            .iter()
            .map(|pk| (pk.to_string(), leader(pk)))
            .collect()
    }

    #[test]
    fn build_slot_map_drops_entries_missing_from_nodes() {
        let mut schedule: LeaderSchedule = HashMap::new();
        schedule.insert("LX".to_string(), vec![0, 1]);
        schedule.insert("GHOST".to_string(), vec![2]);

        let slot_map = TrackerSnapshot::build_slot_map(&schedule, &nodes(&["LX"]));

        assert_eq!(slot_map.len(), 2);
        assert!(slot_map.contains_key(&0));
        assert!(slot_map.contains_key(&1));
        assert!(!slot_map.contains_key(&2));
    }

    #[test]
    fn next_distinct_leader_finds_nearest_within_epoch() {
        let mut schedule: LeaderSchedule = HashMap::new();
        schedule.insert("LX".to_string(), vec![10]);
        schedule.insert("LY".to_string(), vec![12, 13]);
        let slot_map = TrackerSnapshot::build_slot_map(&schedule, &nodes(&["LX", "LY"]));

        let snapshot = TrackerSnapshot {
            epoch_start: 90,
            next_epoch_start: 90 + 432_000,
            slots_in_epoch: 432_000,
            slot_map,
            curr_schedule: HashMap::new(),
            next_schedule: HashMap::new(),
            nodes: nodes(&["LX", "LY"]),
        };

        let (idx, leader) = snapshot.next_distinct_leader(10).unwrap();
        assert_eq!(idx, 12);
        assert_eq!(leader.pubkey, "LY");
    }

    #[test]
    fn next_distinct_leader_wraps_when_none_found_ahead() {
        let mut schedule: LeaderSchedule = HashMap::new();
        schedule.insert("LX".to_string(), vec![2, 3]);
        schedule.insert("LY".to_string(), vec![0, 1]);
        let slot_map = TrackerSnapshot::build_slot_map(&schedule, &nodes(&["LX", "LY"]));

        let snapshot = TrackerSnapshot {
            epoch_start: 0,
            next_epoch_start: 4,
            slots_in_epoch: 4,
            slot_map,
            curr_schedule: HashMap::new(),
            next_schedule: HashMap::new(),
            nodes: nodes(&["LX", "LY"]),
        };

        let (idx, leader) = snapshot.next_distinct_leader(3).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(leader.pubkey, "LY");
    }

    #[test]
    fn leader_at_returns_none_for_missing_slot() {
        let snapshot = TrackerSnapshot {
            epoch_start: 0,
            next_epoch_start: 10,
            slots_in_epoch: 10,
            slot_map: HashMap::new(),
            curr_schedule: HashMap::new(),
            next_schedule: HashMap::new(),
            nodes: HashMap::new(),
        };

        assert!(snapshot.leader_at(0, 1).is_none());
    }
}
