//! tpu-forwarder
//!
//! Latency-optimized forwarder for opaque, already-signed transaction
//! payloads to the imminent leader of a leader-rotated proof-of-stake
//! cluster.
//!
//! ## Features
//!
//! - Real-time leader schedule tracking synchronized to slot ticks
//! - QUIC connection pooling with 0-RTT and pre-warm on upcoming-leader hints
//! - Parallel connection-oriented and connectionless fan-out per send
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use tpu_forwarder::{Dispatcher, LeaderTracker, SolanaRpcClusterClient, TransportPool};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let cluster = Arc::new(SolanaRpcClusterClient::new(
//!     "https://api.mainnet-beta.solana.com".to_string(),
//!     "wss://api.mainnet-beta.solana.com".to_string(),
//! ));
//!
//! let pool = Arc::new(TransportPool::new()?);
//! pool.spawn_reaper();
//!
//! let pool_for_hints = Arc::clone(&pool);
//! let tracker = LeaderTracker::start(
//!     cluster,
//!     Arc::new(move |leader| {
//!         let pool = Arc::clone(&pool_for_hints);
//!         Box::pin(async move { pool.pre_connect(&leader).await })
//!     }),
//! )
//! .await?;
//! tracker.run();
//!
//! let dispatcher = Dispatcher::new(tracker, pool);
//! dispatcher.dispatch(b"\xde\xad\xbe\xef").await?;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]

mod cluster_client;
mod dispatcher;
mod error;
mod model;
mod rpc_adapter;
pub mod tracker;
mod transport;

pub use cluster_client::{ClusterClient, SlotStream};
pub use dispatcher::{Dispatcher, DEFAULT_DISPATCH_DEADLINE};
pub use error::TpuForwarderError;
pub use model::{EpochInfo, Leader, LeaderSchedule, Slot};
pub use rpc_adapter::SolanaRpcClusterClient;
pub use tracker::{HintSink, LeaderTracker, TrackerSnapshot};
pub use transport::{TransportPool, SESSION_TTL};
