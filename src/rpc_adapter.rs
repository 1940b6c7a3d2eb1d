//! `solana-client`-backed implementation of [`ClusterClient`].
//!
//! This adapter does not speak JSON-RPC or WebSocket framing itself — it
//! forwards to `solana_client`'s existing nonblocking RPC and pubsub
//! clients, which already own that plumbing. It exists so the crate is
//! runnable against a real cluster and exercised by integration tests;
//! the tracker, pool, and dispatcher depend only on the `ClusterClient`
//! trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use log::warn;
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::nonblocking::rpc_client::RpcClient;

use crate::cluster_client::{ClusterClient, SlotStream};
use crate::error::TpuForwarderError;
use crate::model::{EpochInfo, Leader, LeaderSchedule, Slot};

/// Depth of the slot-tick forwarding channel. A full channel drops the
/// newest tick because the next tick subsumes it (see DESIGN.md).
const SLOT_CHANNEL_DEPTH: usize = 10;

fn upstream<E: std::fmt::Display>(context: &'static str, err: E) -> TpuForwarderError {
    TpuForwarderError::Upstream(format!("{context}: {err}"))
}

/// Cluster Client backed by a real RPC endpoint and WebSocket subscription.
pub struct SolanaRpcClusterClient {
    rpc_url: String,
    ws_url: String,
    rpc: Arc<RpcClient>,
}

impl SolanaRpcClusterClient {
    /// Creates a new adapter. Does not perform any network I/O itself;
    /// the first call into one of the trait methods does.
    pub fn new(rpc_url: String, ws_url: String) -> Self {
        let rpc = Arc::new(RpcClient::new(rpc_url.clone()));
        Self {
            rpc_url,
            ws_url,
            rpc,
        }
    }
}

#[async_trait]
impl ClusterClient for SolanaRpcClusterClient {
    async fn fetch_epoch_info(&self) -> Result<EpochInfo, TpuForwarderError> {
        let info = self
            .rpc
            .get_epoch_info()
            .await
            .map_err(|e| upstream("getEpochInfo failed", e))?;

        Ok(EpochInfo {
            absolute_slot: info.absolute_slot,
            slot_index: info.slot_index,
            slots_in_epoch: info.slots_in_epoch,
        })
    }

    async fn fetch_cluster_nodes(&self) -> Result<Vec<Leader>, TpuForwarderError> {
        let nodes = self
            .rpc
            .get_cluster_nodes()
            .await
            .map_err(|e| upstream("getClusterNodes failed", e))?;

        Ok(nodes
            .into_iter()
            .map(|n| Leader {
                pubkey: n.pubkey,
                tpu: n.tpu.map(|a| a.to_string()),
                tpu_quic: n.tpu_quic.map(|a| a.to_string()),
                tpu_forwards: n.tpu_forwards.map(|a| a.to_string()),
                tpu_forwards_quic: n.tpu_forwards_quic.map(|a| a.to_string()),
            })
            .collect())
    }

    async fn fetch_leader_schedule(
        &self,
        epoch_slot: Option<Slot>,
    ) -> Result<LeaderSchedule, TpuForwarderError> {
        let schedule = self
            .rpc
            .get_leader_schedule(epoch_slot)
            .await
            .map_err(|e| upstream("getLeaderSchedule failed", e))?
            .ok_or_else(|| {
                TpuForwarderError::Upstream(format!(
                    "no leader schedule available for slot {epoch_slot:?}"
                ))
            })?;

        let mut out: LeaderSchedule = HashMap::with_capacity(schedule.len());
        for (pubkey, slots) in schedule {
            out.insert(pubkey, slots.into_iter().map(|s| s as Slot).collect());
        }
        Ok(out)
    }

    async fn subscribe_slots(&self) -> Result<SlotStream, TpuForwarderError> {
        let ws_url = self.ws_url.clone();
        let pubsub = PubsubClient::new(&ws_url)
            .await
            .map_err(|e| upstream("slot subscription connect failed", e))?;

        let (mut notifications, _unsubscribe) = pubsub
            .slot_subscribe()
            .await
            .map_err(|e| upstream("slotSubscribe failed", e))?;

        let (tx, rx) = tokio::sync::mpsc::channel::<Slot>(SLOT_CHANNEL_DEPTH);

        tokio::spawn(async move {
            // Keep `pubsub` alive for the lifetime of this task; dropping it
            // tears down the WebSocket connection.
            let _pubsub = pubsub;
            while let Some(info) = notifications.next().await {
                if tx.try_send(info.slot).is_err() {
                    warn!("slot subscription channel full, dropping tick");
                }
            }
        });

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|slot| (slot, rx))
        });

        Ok(Box::pin(stream))
    }
}

impl std::fmt::Debug for SolanaRpcClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolanaRpcClusterClient")
            .field("rpc_url", &self.rpc_url)
            .field("ws_url", &self.ws_url)
            .finish()
    }
}
