//! Core data types shared across the tracker, transport pool, and dispatcher.

use std::collections::HashMap;

/// Absolute or relative slot number. The cluster-global counter and the
/// epoch-relative index share this representation; which one a given
/// value holds is determined by context (see `EpochInfo::relative_slot`).
pub type Slot = u64;

/// A validator contact record.
///
/// Immutable once fetched; a fresh cluster-nodes snapshot replaces the
/// whole set wholesale rather than patching individual entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leader {
    /// Stable public identifier (base58 pubkey string, opaque to this crate).
    pub pubkey: String,
    /// Connectionless (UDP) submission endpoint, `host:port`.
    pub tpu: Option<String>,
    /// Connection-oriented (QUIC) submission endpoint, `host:port`.
    pub tpu_quic: Option<String>,
    /// Forwarding variant of `tpu`, preferred by validators when present.
    pub tpu_forwards: Option<String>,
    /// Forwarding variant of `tpu_quic`, preferred by validators when present.
    pub tpu_forwards_quic: Option<String>,
}

impl Leader {
    /// Connectionless endpoint to submit to: prefers the forwards variant.
    pub fn udp_endpoint(&self) -> Option<&str> {
        self.tpu_forwards.as_deref().or(self.tpu.as_deref())
    }

    /// Connection-oriented endpoint to submit to: prefers the forwards variant.
    pub fn quic_endpoint(&self) -> Option<&str> {
        self.tpu_forwards_quic.as_deref().or(self.tpu_quic.as_deref())
    }
}

/// A snapshot of the cluster's epoch position at fetch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochInfo {
    /// Cluster-global slot counter at fetch time.
    pub absolute_slot: Slot,
    /// Position of `absolute_slot` within the current epoch.
    pub slot_index: Slot,
    /// Length of an epoch, in slots.
    pub slots_in_epoch: Slot,
}

impl EpochInfo {
    /// The absolute slot at which the current epoch began.
    pub fn epoch_start(&self) -> Slot {
        self.absolute_slot - self.slot_index
    }

    /// Converts an absolute slot to its index within this epoch.
    ///
    /// Only meaningful while this `EpochInfo` is still the tracker's
    /// current epoch; callers are responsible for checking range.
    pub fn relative_slot(&self, absolute: Slot) -> Slot {
        absolute - self.epoch_start()
    }
}

/// Mapping from leader public identifier to the sorted relative slot
/// indices (within one epoch) at which that leader produces blocks, as
/// returned by `getLeaderSchedule`.
pub type LeaderSchedule = HashMap<String, Vec<Slot>>;
