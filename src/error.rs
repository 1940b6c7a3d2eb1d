//! Domain error types for the forwarder core.
//!
//! A real `std::error::Error` implementor so call sites propagate with
//! `?` instead of matching on string contents.

use thiserror::Error;

/// Domain-level error kinds produced by the tracker and transport pool.
#[derive(Debug, Error)]
pub enum TpuForwarderError {
    /// A Cluster Client call failed or returned a non-success response.
    #[error("upstream cluster request failed: {0}")]
    Upstream(String),

    /// `SlotMap` lookup returned no entry for the requested slot.
    #[error("no leader known for slot {slot}")]
    LeaderUnknown {
        /// The relative slot that had no entry.
        slot: u64,
    },

    /// A dial is already in flight for the requested endpoint.
    #[error("dial already in flight for {endpoint}")]
    NotReady {
        /// The endpoint key that is already connecting.
        endpoint: String,
    },

    /// Failed to establish the connection-oriented transport session.
    #[error("failed to dial {endpoint}")]
    TransportDial {
        /// The endpoint key that could not be dialed.
        endpoint: String,
        #[source]
        source: anyhow::Error,
    },

    /// Failed to write the payload once a session was available.
    #[error("failed to write to {endpoint}")]
    TransportWrite {
        /// The endpoint key the write failed against.
        endpoint: String,
        #[source]
        source: anyhow::Error,
    },
}

impl TpuForwarderError {
    /// Returns whether a caller might reasonably retry the same operation.
    ///
    /// `LeaderUnknown` and `Upstream` reflect state that only changes on
    /// the next slot tick or refresh; the transport kinds are immediately
    /// retryable since the next send opens a fresh stream or dial.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TpuForwarderError::NotReady { .. }
                | TpuForwarderError::TransportDial { .. }
                | TpuForwarderError::TransportWrite { .. }
        )
    }
}
