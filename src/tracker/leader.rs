//! Leader tracking coordination.
//!
//! Owns `EpochInfo`, the leader schedule, and the SlotMap exclusively;
//! all external access is through [`LeaderTracker::current_leader`] or the
//! pre-connect hint sink supplied at construction.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::Mutex;

use crate::cluster_client::ClusterClient;
use crate::error::TpuForwarderError;
use crate::model::{Leader, Slot};

use super::snapshot::TrackerSnapshot;
use super::slots::SlotsTracker;

/// A pre-connect hint callback, invoked on a detached task so the slot
/// worker never blocks on transport I/O.
pub type HintSink = Arc<dyn Fn(Leader) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Coordinates slot tracking, leader schedule, and pre-connect hints.
pub struct LeaderTracker {
    cluster: Arc<dyn ClusterClient>,
    snapshot: ArcSwap<TrackerSnapshot>,
    slots: Mutex<SlotsTracker>,
    current_absolute_slot: AtomicU64,
    ready: AtomicBool,
    refresh_pending: AtomicBool,
    last_hint: Mutex<Option<String>>,
    hint_sink: HintSink,
}

impl LeaderTracker {
    /// Runs the Start protocol: fetches epoch info,
    /// cluster nodes, and both the current and next epoch schedules in
    /// sequence, builds the initial SlotMap, and returns a tracker ready
    /// to have [`LeaderTracker::run`] spawn its background tasks.
    ///
    /// Any fetch failure aborts Start and is returned to the caller.
    pub async fn start(
        cluster: Arc<dyn ClusterClient>,
        hint_sink: HintSink,
    ) -> Result<Arc<Self>, TpuForwarderError> {
        let epoch_info = cluster.fetch_epoch_info().await?;
        let nodes_vec = cluster.fetch_cluster_nodes().await?;
        let nodes: HashMap<String, Leader> =
            nodes_vec.into_iter().map(|l| (l.pubkey.clone(), l)).collect();

        let epoch_start = epoch_info.epoch_start();
        let next_epoch_start = epoch_start + epoch_info.slots_in_epoch;

        let curr_schedule = cluster.fetch_leader_schedule(Some(epoch_start)).await?;
        let next_schedule = cluster.fetch_leader_schedule(Some(next_epoch_start)).await?;

        let slot_map = TrackerSnapshot::build_slot_map(&curr_schedule, &nodes);

        let snapshot = TrackerSnapshot {
            epoch_start,
            next_epoch_start,
            slots_in_epoch: epoch_info.slots_in_epoch,
            slot_map,
            curr_schedule,
            next_schedule,
            nodes,
        };

        info!(
            "leader tracker started: epoch_start={epoch_start} slots_in_epoch={}",
            epoch_info.slots_in_epoch
        );

        Ok(Arc::new(Self {
            cluster,
            snapshot: ArcSwap::from_pointee(snapshot),
            slots: Mutex::new(SlotsTracker::new()),
            current_absolute_slot: AtomicU64::new(epoch_info.absolute_slot),
            ready: AtomicBool::new(false),
            refresh_pending: AtomicBool::new(false),
            last_hint: Mutex::new(None),
            hint_sink,
        }))
    }

    /// Spawns the slot worker as a detached task.
    pub fn run(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_slot_listener().await;
        });
    }

    /// Whether the tracker has received at least one slot tick.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// The most recently observed absolute slot.
    pub fn current_absolute_slot(&self) -> Slot {
        self.current_absolute_slot.load(Ordering::Acquire)
    }

    /// Number of validators in the current cluster-nodes snapshot.
    pub fn validator_count(&self) -> usize {
        self.snapshot.load().nodes.len()
    }

    /// `current_leader(offset)`: the leader `offset` slots ahead of the
    /// last observed slot, and its absolute slot number.
    pub fn current_leader(&self, offset: Slot) -> Result<(Leader, Slot), TpuForwarderError> {
        let snapshot = self.snapshot.load();
        let absolute = self.current_absolute_slot();
        let relative = snapshot
            .relative_slot(absolute)
            .ok_or(TpuForwarderError::LeaderUnknown { slot: absolute })?;

        snapshot
            .leader_at(relative, offset)
            .ok_or(TpuForwarderError::LeaderUnknown {
                slot: relative + offset,
            })
    }

    /// Resubscribes with exponential backoff on stream closure or
    /// subscribe failure, so a dropped upstream WebSocket doesn't freeze
    /// the tracker on its last observed slot forever.
    async fn run_slot_listener(self: Arc<Self>) {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            match self.cluster.subscribe_slots().await {
                Ok(mut stream) => {
                    backoff = INITIAL_BACKOFF;
                    while let Some(slot) = stream.next().await {
                        self.ready.store(true, Ordering::Release);
                        self.handle_slot_tick(slot).await;
                    }
                    warn!("slot subscription ended, resubscribing");
                }
                Err(e) => {
                    error!("slot subscription failed: {e}");
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    async fn handle_slot_tick(self: &Arc<Self>, absolute_slot: Slot) {
        let estimated_slot = {
            let mut slots = self.slots.lock().await;
            slots.record(absolute_slot)
        };
        self.current_absolute_slot
            .store(estimated_slot, Ordering::Release);

        if estimated_slot >= self.snapshot.load().next_epoch_start {
            debug!("rotating epoch at slot {estimated_slot}");
            self.rotate_epoch(estimated_slot).await;
        }

        let snapshot = self.snapshot.load();
        let Some(relative) = snapshot.relative_slot(estimated_slot) else {
            return;
        };

        if let Some((_, upcoming)) = snapshot.next_distinct_leader(relative) {
            drop(snapshot);
            self.emit_hint_if_due(upcoming).await;
        }
    }

    /// Promotes the prefetched next-epoch schedule to current and rebuilds
    /// the SlotMap, then spawns a background refresh of epoch info,
    /// cluster nodes, and the new next-epoch schedule. The promotion
    /// itself never suspends on network I/O.
    async fn rotate_epoch(self: &Arc<Self>, absolute_slot: Slot) {
        let old = self.snapshot.load_full();
        if absolute_slot < old.next_epoch_start {
            return;
        }

        let new_epoch_start = old.next_epoch_start;
        let new_next_epoch_start = new_epoch_start + old.slots_in_epoch;
        let slot_map = TrackerSnapshot::build_slot_map(&old.next_schedule, &old.nodes);

        let promoted = TrackerSnapshot {
            epoch_start: new_epoch_start,
            next_epoch_start: new_next_epoch_start,
            slots_in_epoch: old.slots_in_epoch,
            slot_map,
            curr_schedule: old.next_schedule.clone(),
            next_schedule: HashMap::new(),
            nodes: old.nodes.clone(),
        };

        self.snapshot.store(Arc::new(promoted));
        info!("rotated epoch: {} -> {new_epoch_start}", old.epoch_start);

        self.spawn_refresh();
    }

    /// Spawns the background refresh task, guarded so at most one is ever
    /// in flight, so rotation never spawns an unbounded pile of refreshes.
    fn spawn_refresh(self: &Arc<Self>) {
        if self.refresh_pending.swap(true, Ordering::AcqRel) {
            debug!("refresh already in flight, skipping");
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.do_refresh().await;
            this.refresh_pending.store(false, Ordering::Release);
        });
    }

    async fn do_refresh(&self) {
        let snapshot = self.snapshot.load_full();

        let epoch_info = match self.cluster.fetch_epoch_info().await {
            Ok(info) => info,
            Err(e) => {
                error!("epoch info refresh failed: {e}");
                return;
            }
        };

        let nodes_vec = match self.cluster.fetch_cluster_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!("cluster nodes refresh failed: {e}");
                return;
            }
        };
        let nodes: HashMap<String, Leader> =
            nodes_vec.into_iter().map(|l| (l.pubkey.clone(), l)).collect();

        let next_schedule = match self
            .cluster
            .fetch_leader_schedule(Some(snapshot.next_epoch_start))
            .await
        {
            Ok(schedule) => schedule,
            Err(e) => {
                error!("next-epoch schedule refresh failed: {e}");
                return;
            }
        };

        let slot_map = TrackerSnapshot::build_slot_map(&snapshot.curr_schedule, &nodes);

        let refreshed = TrackerSnapshot {
            epoch_start: snapshot.epoch_start,
            next_epoch_start: snapshot.next_epoch_start,
            slots_in_epoch: epoch_info.slots_in_epoch,
            slot_map,
            curr_schedule: snapshot.curr_schedule.clone(),
            next_schedule,
            nodes,
        };

        self.snapshot.store(Arc::new(refreshed));
        info!("refreshed tracker state after rotation");
    }

    /// Hint emission policy: a *new* upcoming leader is
    /// recorded but not emitted; once the same upcoming leader is observed
    /// on a subsequent tick, the hint fires (repeatedly) on a detached task.
    async fn emit_hint_if_due(self: &Arc<Self>, leader: Leader) {
        let mut last = self.last_hint.lock().await;
        if last.as_deref() == Some(leader.pubkey.as_str()) {
            let sink = self.hint_sink.clone();
            tokio::spawn(async move {
                sink(leader).await;
            });
        } else {
            *last = Some(leader.pubkey.clone());
        }
    }
}

impl std::fmt::Debug for LeaderTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderTracker")
            .field("current_absolute_slot", &self.current_absolute_slot())
            .field("ready", &self.is_ready())
            .finish()
    }
}
