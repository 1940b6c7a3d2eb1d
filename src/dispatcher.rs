//! Dispatcher: glue between the Leader Tracker and the Transport Pool.
//!
//! On each inbound payload, resolves the target leader and fans the
//! payload out over both transports, bounded by a deadline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::error::TpuForwarderError;
use crate::tracker::LeaderTracker;
use crate::transport::TransportPool;

/// Default deadline applied to a dispatch call when the caller does not
/// supply one.
pub const DEFAULT_DISPATCH_DEADLINE: Duration = Duration::from_secs(3);

/// On each inbound payload, resolves the target leader and fans the
/// payload out over both transports. Fire-and-forget: a transport
/// failure is logged, never returned to the caller.
pub struct Dispatcher {
    tracker: Arc<LeaderTracker>,
    pool: Arc<TransportPool>,
}

impl Dispatcher {
    pub fn new(tracker: Arc<LeaderTracker>, pool: Arc<TransportPool>) -> Self {
        Self { tracker, pool }
    }

    /// Dispatches `payload` under the default deadline.
    pub async fn dispatch(&self, payload: &[u8]) -> Result<(), TpuForwarderError> {
        self.dispatch_with_deadline(payload, DEFAULT_DISPATCH_DEADLINE)
            .await
    }

    /// Dispatches `payload`, targeting the next slot's leader (`offset =
    /// 1`, since the presently-producing leader's window is likely
    /// already closing) and bounding the transport fan-out by `deadline`.
    ///
    /// Fails only if the tracker cannot resolve a target leader; a
    /// transport timeout or failure is swallowed after being logged.
    pub async fn dispatch_with_deadline(
        &self,
        payload: &[u8],
        deadline: Duration,
    ) -> Result<(), TpuForwarderError> {
        let start = Instant::now();
        let (leader, absolute_slot) = self.tracker.current_leader(1)?;

        match tokio::time::timeout(deadline, self.pool.send(&leader, payload)).await {
            Ok(()) => {
                info!(
                    "dispatched {} bytes to {} for slot {absolute_slot} in {:?}",
                    payload.len(),
                    leader.pubkey,
                    start.elapsed()
                );
            }
            Err(_) => {
                warn!(
                    "dispatch to {} for slot {absolute_slot} exceeded deadline {:?}",
                    leader.pubkey, deadline
                );
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}
