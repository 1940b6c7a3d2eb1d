//! Transport pool: warm QUIC sessions plus a connectionless UDP fallback.
//!
//! Maintains one cached QUIC session per leader endpoint, pre-connects on
//! hint, and reaps sessions past their TTL.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use log::{debug, info, warn};
use quinn::{
    crypto::rustls::QuicClientConfig, ClientConfig, Connection, Endpoint, IdleTimeout,
    TransportConfig,
};
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::TpuForwarderError;
use crate::model::Leader;

const ALPN_TPU_PROTOCOL_ID: &[u8] = b"solana-tpu";
const QUIC_MAX_IDLE_TIMEOUT: Duration = Duration::from_secs(5);
const QUIC_KEEP_ALIVE: Duration = Duration::from_secs(4);

/// TTL a cached session is allowed to live before the reaper evicts it.
pub const SESSION_TTL: Duration = Duration::from_secs(5);
/// Interval at which the reaper task sweeps the cache.
const REAP_INTERVAL: Duration = Duration::from_secs(5);
/// Write deadline for the connectionless fallback.
const UDP_WRITE_DEADLINE: Duration = Duration::from_millis(400);

struct CachedSession {
    conn: Connection,
    opened_at: Instant,
}

/// Keyed cache of warm outbound sessions to leader QUIC endpoints, with a
/// connectionless UDP fallback used in parallel on every send.
pub struct TransportPool {
    endpoint: Endpoint,
    cache: RwLock<HashMap<String, CachedSession>>,
    connecting: RwLock<HashSet<String>>,
}

impl TransportPool {
    /// Builds a pool with a freshly generated self-signed ed25519 client
    /// certificate, reused for the pool's lifetime.
    pub fn new() -> anyhow::Result<Self> {
        info!("creating transport pool");

        let client_certificate = solana_tls_utils::QuicClientCertificate::new(None);

        let mut crypto = solana_tls_utils::tls_client_config_builder()
            .with_client_auth_cert(
                vec![client_certificate.certificate.clone()],
                client_certificate.key.clone_key(),
            )
            .context("failed to set QUIC client certificate")?;

        crypto.enable_early_data = true;
        crypto.alpn_protocols = vec![ALPN_TPU_PROTOCOL_ID.to_vec()];

        let transport_config = {
            let mut config = TransportConfig::default();
            let timeout = IdleTimeout::try_from(QUIC_MAX_IDLE_TIMEOUT).unwrap();
            config.max_idle_timeout(Some(timeout));
            config.keep_alive_interval(Some(QUIC_KEEP_ALIVE));
            config.send_fairness(false);
            config
        };

        let mut client_config =
            ClientConfig::new(Arc::new(QuicClientConfig::try_from(crypto)?));
        client_config.transport_config(Arc::new(transport_config));

        let mut endpoint = Endpoint::client("0.0.0.0:0".parse()?)?;
        endpoint.set_default_client_config(client_config);

        Ok(Self {
            endpoint,
            cache: RwLock::new(HashMap::new()),
            connecting: RwLock::new(HashSet::new()),
        })
    }

    /// Spawns the periodic cache reaper as a detached task.
    pub fn spawn_reaper(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REAP_INTERVAL);
            loop {
                ticker.tick().await;
                this.reap_expired().await;
            }
        });
    }

    async fn reap_expired(&self) {
        let mut cache = self.cache.write().await;
        let now = Instant::now();
        let expired: Vec<String> = cache
            .iter()
            .filter(|(_, s)| now.duration_since(s.opened_at) >= SESSION_TTL)
            .map(|(k, _)| k.clone())
            .collect();

        for key in expired {
            if let Some(session) = cache.remove(&key) {
                session.conn.close(0u32.into(), b"ttl expired");
                debug!("reaped expired session to {key}");
            }
        }
    }

    /// Idempotent pre-connect: returns immediately if a live session
    /// exists or a dial is already in flight for this endpoint.
    pub async fn pre_connect(&self, leader: &Leader) {
        let Some(endpoint) = leader.quic_endpoint() else {
            return;
        };
        if self.has_live_session(endpoint).await {
            return;
        }
        match self.dial(endpoint).await {
            Ok(()) => debug!("pre-connected to {endpoint}"),
            Err(TpuForwarderError::NotReady { .. }) => {}
            Err(e) => debug!("pre-connect to {endpoint} failed: {e}"),
        }
    }

    async fn has_live_session(&self, endpoint: &str) -> bool {
        self.cache.read().await.get(endpoint).is_some_and(|session| {
            Instant::now().duration_since(session.opened_at) < SESSION_TTL
                && session.conn.close_reason().is_none()
        })
    }

    /// Dial protocol: mark connecting, resolve, open, open a
    /// zero-byte uni stream to materialise it on the peer, commit, clear.
    async fn dial(&self, endpoint: &str) -> Result<(), TpuForwarderError> {
        {
            let mut connecting = self.connecting.write().await;
            if !connecting.insert(endpoint.to_string()) {
                return Err(TpuForwarderError::NotReady {
                    endpoint: endpoint.to_string(),
                });
            }
        }

        let result = self.dial_inner(endpoint).await;

        // On success, `dial_inner` already cleared the mark as part of its
        // single cache+connecting commit. Only an error path leaves it set.
        if result.is_err() {
            self.connecting.write().await.remove(endpoint);
        }
        result
    }

    async fn dial_inner(&self, endpoint: &str) -> Result<(), TpuForwarderError> {
        let addr: SocketAddr = endpoint
            .parse()
            .map_err(|e| TpuForwarderError::TransportDial {
                endpoint: endpoint.to_string(),
                source: anyhow!("invalid endpoint address: {e}"),
            })?;

        let connecting = self
            .endpoint
            .connect(addr, "solana")
            .map_err(|e| TpuForwarderError::TransportDial {
                endpoint: endpoint.to_string(),
                source: e.into(),
            })?;

        let conn = match connecting.into_0rtt() {
            Ok((conn, accepted)) => {
                debug!("attempting 0-RTT to {endpoint}");
                if accepted.await {
                    debug!("0-RTT accepted by {endpoint}");
                }
                conn
            }
            Err(connecting) => connecting
                .await
                .map_err(|e| TpuForwarderError::TransportDial {
                    endpoint: endpoint.to_string(),
                    source: e.into(),
                })?,
        };

        let mut send_stream =
            conn.open_uni()
                .await
                .map_err(|e| TpuForwarderError::TransportDial {
                    endpoint: endpoint.to_string(),
                    source: e.into(),
                })?;
        send_stream
            .write_all(&[])
            .await
            .map_err(|e| TpuForwarderError::TransportDial {
                endpoint: endpoint.to_string(),
                source: e.into(),
            })?;
        send_stream
            .finish()
            .map_err(|e| TpuForwarderError::TransportDial {
                endpoint: endpoint.to_string(),
                source: e.into(),
            })?;

        // Hold both locks across the insert-and-clear so no external reader
        // can ever acquire either lock in between and observe `connecting[k]`
        // still set while `cachedConns[k]` is already live, or vice versa
        // (Testable Property #2). Taking `connecting` before `cache` matches
        // the only other place both are touched together (none — every other
        // path locks at most one of the two).
        {
            let mut connecting = self.connecting.write().await;
            let mut cache = self.cache.write().await;
            cache.insert(
                endpoint.to_string(),
                CachedSession {
                    conn,
                    opened_at: Instant::now(),
                },
            );
            connecting.remove(endpoint);
        }

        Ok(())
    }

    /// Fans the payload out over both transports in parallel. Never fails
    /// the overall call on a single transport's failure —
    /// failures are logged and swallowed here.
    pub async fn send(&self, leader: &Leader, payload: &[u8]) {
        let quic_fut = async {
            if let Some(endpoint) = leader.quic_endpoint() {
                if let Err(e) = self.send_quic(endpoint, payload).await {
                    debug!("QUIC send to {endpoint} failed: {e}");
                }
            }
        };
        let udp_fut = async {
            if let Some(endpoint) = leader.udp_endpoint() {
                if let Err(e) = self.send_udp(endpoint, payload).await {
                    debug!("UDP send to {endpoint} failed: {e}");
                }
            }
        };
        tokio::join!(quic_fut, udp_fut);
    }

    async fn send_quic(&self, endpoint: &str, payload: &[u8]) -> Result<(), TpuForwarderError> {
        let conn = self.get_or_dial(endpoint).await?;

        let mut stream =
            conn.open_uni()
                .await
                .map_err(|e| TpuForwarderError::TransportWrite {
                    endpoint: endpoint.to_string(),
                    source: e.into(),
                })?;
        stream
            .write_all(payload)
            .await
            .map_err(|e| TpuForwarderError::TransportWrite {
                endpoint: endpoint.to_string(),
                source: e.into(),
            })?;
        stream
            .finish()
            .map_err(|e| TpuForwarderError::TransportWrite {
                endpoint: endpoint.to_string(),
                source: e.into(),
            })?;

        Ok(())
    }

    async fn get_or_dial(&self, endpoint: &str) -> Result<Connection, TpuForwarderError> {
        if let Some(session) = self.cache.read().await.get(endpoint) {
            if Instant::now().duration_since(session.opened_at) < SESSION_TTL
                && session.conn.close_reason().is_none()
            {
                return Ok(session.conn.clone());
            }
        }

        match self.dial(endpoint).await {
            Ok(()) | Err(TpuForwarderError::NotReady { .. }) => {}
            Err(e) => return Err(e),
        }

        self.cache
            .read()
            .await
            .get(endpoint)
            .map(|s| s.conn.clone())
            .ok_or_else(|| TpuForwarderError::TransportDial {
                endpoint: endpoint.to_string(),
                source: anyhow!("no session available after dial"),
            })
    }

    async fn send_udp(&self, endpoint: &str, payload: &[u8]) -> Result<(), TpuForwarderError> {
        let addr: SocketAddr = endpoint
            .parse()
            .map_err(|e| TpuForwarderError::TransportWrite {
                endpoint: endpoint.to_string(),
                source: anyhow!("invalid endpoint address: {e}"),
            })?;

        let bind_addr = if addr.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| TpuForwarderError::TransportWrite {
                endpoint: endpoint.to_string(),
                source: e.into(),
            })?;

        tokio::time::timeout(UDP_WRITE_DEADLINE, socket.send_to(payload, addr))
            .await
            .map_err(|_| TpuForwarderError::TransportWrite {
                endpoint: endpoint.to_string(),
                source: anyhow!("UDP write deadline exceeded"),
            })?
            .map_err(|e| TpuForwarderError::TransportWrite {
                endpoint: endpoint.to_string(),
                source: e.into(),
            })?;

        Ok(())
    }

    /// Number of live cached sessions, for diagnostics and tests.
    pub async fn session_count(&self) -> usize {
        self.cache.read().await.len()
    }
}

impl std::fmt::Debug for TransportPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportPool").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer};
    use tokio::sync::mpsc;

    fn leader_with(udp: &str, quic: &str) -> Leader {
        Leader {
            pubkey: "LX".to_string(),
            tpu: Some(udp.to_string()),
            tpu_quic: Some(quic.to_string()),
            tpu_forwards: None,
            tpu_forwards_quic: None,
        }
    }

    /// A minimal in-process QUIC server: self-signed cert, ALPN matching
    /// the pool's client config, peer identity irrelevant since the pool
    /// never verifies it.
    fn server_config() -> quinn::ServerConfig {
        let certified_key = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .unwrap();

        let cert_der = CertificateDer::from(certified_key.cert.der().to_vec());
        let key_der = PrivatePkcs8KeyDer::from(certified_key.signing_key.serialize_der());

        let mut crypto = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der.into())
            .unwrap();
        crypto.alpn_protocols = vec![ALPN_TPU_PROTOCOL_ID.to_vec()];

        let quic_crypto = quinn::crypto::rustls::QuicServerConfig::try_from(crypto).unwrap();
        quinn::ServerConfig::with_crypto(Arc::new(quic_crypto))
    }

    /// Spawns a server that accepts one connection and signals `closed_tx`
    /// once the peer tears it down, to observe the reaper's close call.
    fn spawn_close_detecting_server() -> (SocketAddr, mpsc::Receiver<()>) {
        let endpoint = Endpoint::server(server_config(), "127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = endpoint.local_addr().unwrap();
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            if let Some(incoming) = endpoint.accept().await {
                if let Ok(conn) = incoming.await {
                    conn.closed().await;
                    let _ = tx.send(()).await;
                }
            }
        });

        (addr, rx)
    }

    /// Spawns a server that accepts one connection and forwards every
    /// non-empty uni stream's bytes over `rx` (the dial protocol's
    /// zero-byte materializing stream is filtered out).
    fn spawn_echo_server() -> (SocketAddr, mpsc::Receiver<Vec<u8>>) {
        let endpoint = Endpoint::server(server_config(), "127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = endpoint.local_addr().unwrap();
        let (tx, rx) = mpsc::channel(4);

        tokio::spawn(async move {
            if let Some(incoming) = endpoint.accept().await {
                if let Ok(conn) = incoming.await {
                    loop {
                        match conn.accept_uni().await {
                            Ok(mut stream) => {
                                if let Ok(data) = stream.read_to_end(64 * 1024).await {
                                    if !data.is_empty() {
                                        let _ = tx.send(data).await;
                                    }
                                }
                            }
                            Err(_) => break,
                        }
                    }
                }
            }
        });

        (addr, rx)
    }

    #[tokio::test]
    async fn udp_fallback_reaches_a_real_socket() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let local_addr = socket.local_addr().unwrap();

        let pool = TransportPool::new().unwrap();
        let leader = leader_with(&local_addr.to_string(), "127.0.0.1:1");

        pool.send_udp(leader.udp_endpoint().unwrap(), b"\xde\xad\xbe\xef")
            .await
            .unwrap();

        let mut buf = [0u8; 16];
        let (len, _) = socket.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"\xde\xad\xbe\xef");
    }

    #[tokio::test]
    async fn quic_send_to_nothing_is_swallowed() {
        let pool = TransportPool::new().unwrap();
        let leader = leader_with("127.0.0.1:1", "127.0.0.1:2");
        pool.send(&leader, b"payload").await;
    }

    #[tokio::test]
    async fn concurrent_dials_to_the_same_endpoint_dedupe() {
        let pool = TransportPool::new().unwrap();
        // Non-routable address: the handshake never completes, leaving the
        // "connecting" mark held for the duration of both calls below.
        let endpoint = "10.255.255.1:1234";

        let (a, b) = tokio::join!(pool.dial(endpoint), pool.dial(endpoint));

        let not_ready_count = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(TpuForwarderError::NotReady { .. })))
            .count();
        assert_eq!(not_ready_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_reap_removes_expired_session_and_closes_it() {
        let (server_addr, mut closed_rx) = spawn_close_detecting_server();

        let pool = TransportPool::new().unwrap();
        pool.dial(&server_addr.to_string()).await.unwrap();
        assert_eq!(pool.session_count().await, 1);

        tokio::time::advance(SESSION_TTL + Duration::from_secs(1)).await;
        pool.reap_expired().await;

        assert_eq!(pool.session_count().await, 0);
        assert!(closed_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn fan_out_udp_succeeds_when_quic_endpoint_is_bad() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let local_addr = socket.local_addr().unwrap();

        let pool = TransportPool::new().unwrap();
        let leader = leader_with(&local_addr.to_string(), "not-an-endpoint");

        pool.send(&leader, b"\xde\xad\xbe\xef").await;

        let mut buf = [0u8; 16];
        let (len, _) = tokio::time::timeout(Duration::from_millis(500), socket.recv_from(&mut buf))
            .await
            .expect("UDP send should still occur despite the QUIC endpoint being unparseable")
            .unwrap();
        assert_eq!(&buf[..len], b"\xde\xad\xbe\xef");
    }

    #[tokio::test]
    async fn fan_out_quic_succeeds_when_udp_endpoint_is_bad() {
        let (server_addr, mut received_rx) = spawn_echo_server();

        let pool = TransportPool::new().unwrap();
        let leader = leader_with("not-an-endpoint", &server_addr.to_string());

        pool.send(&leader, b"\xde\xad\xbe\xef").await;

        let received = tokio::time::timeout(Duration::from_secs(2), received_rx.recv())
            .await
            .expect("QUIC send should still occur despite the UDP endpoint being unparseable")
            .expect("server closed its channel without receiving anything");
        assert_eq!(received, b"\xde\xad\xbe\xef");
    }
}
