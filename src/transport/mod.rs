//! Transport pool for leader-bound QUIC sessions and UDP fallback.

mod pool;

pub use pool::{TransportPool, SESSION_TTL};
