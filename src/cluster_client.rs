//! The abstract upstream boundary the core consumes.
//!
//! The core never speaks JSON-RPC or WebSocket framing itself; it depends
//! on this trait, which a collaborator crate (see [`crate::rpc_adapter`]
//! for a thin `solana-client`-backed one) satisfies.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::error::TpuForwarderError;
use crate::model::{EpochInfo, Leader, LeaderSchedule, Slot};

/// A push stream of current (absolute) slot numbers, delivered roughly
/// once per slot. May end early; the tracker treats that as recoverable
/// and resubscribes (see `LeaderTracker::run_slot_listener`).
pub type SlotStream = Pin<Box<dyn Stream<Item = Slot> + Send>>;

/// Upstream cluster operations the Leader Tracker depends on.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// One-shot request for the cluster's current epoch position.
    async fn fetch_epoch_info(&self) -> Result<EpochInfo, TpuForwarderError>;

    /// One-shot request for the validator contact list.
    async fn fetch_cluster_nodes(&self) -> Result<Vec<Leader>, TpuForwarderError>;

    /// Fetches the leader schedule for the epoch containing `epoch_slot`,
    /// or the current epoch if `None`.
    async fn fetch_leader_schedule(
        &self,
        epoch_slot: Option<Slot>,
    ) -> Result<LeaderSchedule, TpuForwarderError>;

    /// Opens a subscription to the stream of current slot numbers.
    async fn subscribe_slots(&self) -> Result<SlotStream, TpuForwarderError>;
}
