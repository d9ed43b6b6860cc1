//! # Transport Abstraction
//!
//! A thin interface over TCP that exposes the four ZeroMQ-style socket
//! shapes this benchmark needs: a ROUTER/REQ pair for the control plane
//! (server observes peer identity, replies to that identity), a PUB/SUB
//! pair for broadcast control signaling, and PUSH/PULL plus PUB/SUB
//! variants for the timed data plane.
//!
//! There is no real libzmq binding here — every socket kind is built on
//! `tokio::net::TcpStream`/`TcpListener` with a length-prefixed framing
//! codec (see [`codec`]) and `socket2`-level tuning. High-water-mark is
//! enforced in-process with a bounded channel per connection: a full
//! channel is exactly "would-block" for PUSH/REQ and "drop" for PUB.

pub mod codec;
pub mod control;
pub mod data;

use std::time::Duration;
use thiserror::Error;

/// Errors distinguished at the transport seam.
///
/// `WouldBlock` is not fatal anywhere it appears — callers match on it
/// explicitly rather than inspecting an error string, which is the
/// entire reason this enum exists instead of folding everything into
/// `anyhow::Error` at this layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A non-blocking operation could not complete immediately.
    #[error("would block")]
    WouldBlock,

    /// The peer closed its end of the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// Binding a listener failed after exhausting the retry budget.
    #[error("failed to bind port {port} after {attempts} attempts: {source}")]
    BindFailed {
        port: u16,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    /// A frame did not parse as expected wire format (e.g. missing
    /// delimiter part, truncated length prefix).
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Per-socket tunables shared by every socket kind.
#[derive(Debug, Clone, Copy)]
pub struct SocketOptions {
    /// Maximum number of queued outbound messages per peer connection
    /// before send backpressures (PUSH/REQ) or drops (PUB).
    pub send_hwm: usize,
    /// Maximum number of queued inbound messages before the receiver
    /// stops accepting new frames from the wire.
    pub recv_hwm: usize,
    /// Linger on close; the spec calls for zero everywhere.
    pub linger: Duration,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            send_hwm: 1000,
            recv_hwm: 1000,
            linger: Duration::ZERO,
        }
    }
}

/// Opaque per-connection identity, assigned by the transport on accept.
///
/// Mirrors the ZeroMQ ROUTER identity frame: the coordinator never
/// chooses this value, it is handed one the first time a peer's bytes
/// arrive and uses it to address replies back to that same peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Resolves a `host:port` pair to a single socket address, used by
/// both the coordinator (binding) and every worker (connecting) to
/// turn `network.coordinator_ip` plus a configured port into an
/// address without duplicating DNS-resolution error handling in each.
pub fn resolve_addr(host: &str, port: u16) -> anyhow::Result<std::net::SocketAddr> {
    use anyhow::Context;
    use std::net::ToSocketAddrs;
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve {host}:{port}"))?
        .next()
        .with_context(|| format!("{host}:{port} resolved to no addresses"))
}

/// Binds a `TcpListener`, retrying transient conflicts.
///
/// Grounds the worker/sender binding race called out in the component
/// design: up to 10 attempts, 200ms backoff, before giving up fatally.
pub async fn bind_with_retry(
    addr: std::net::SocketAddr,
) -> Result<tokio::net::TcpListener> {
    const MAX_ATTEMPTS: u32 = 10;
    const BACKOFF: Duration = Duration::from_millis(200);

    let mut last_err = None;
    for attempt in 1..=MAX_ATTEMPTS {
        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                tracing::debug!(
                    attempt,
                    port = addr.port(),
                    error = %e,
                    "bind attempt failed, retrying"
                );
                last_err = Some(e);
                tokio::time::sleep(BACKOFF).await;
            }
        }
    }

    Err(TransportError::BindFailed {
        port: addr.port(),
        attempts: MAX_ATTEMPTS,
        source: last_err.expect("loop runs at least once"),
    })
}

/// Connects a `TcpStream`, retrying while the peer isn't listening yet.
///
/// Only needed for the `--coordinator` co-location flag, where a worker
/// spawns the coordinator in the same process and races it to connect
/// before the coordinator's `bind_with_retry` has finished; a standalone
/// coordinator started ahead of its workers never hits this path. Same
/// budget as [`bind_with_retry`] so the total worst-case startup delay
/// for either race is the same order of magnitude.
pub async fn connect_with_retry(addr: std::net::SocketAddr) -> Result<tokio::net::TcpStream> {
    const MAX_ATTEMPTS: u32 = 10;
    const BACKOFF: Duration = Duration::from_millis(200);

    let mut last_err = None;
    for attempt in 1..=MAX_ATTEMPTS {
        match tokio::net::TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::debug!(
                    attempt,
                    %addr,
                    error = %e,
                    "connect attempt failed, retrying"
                );
                last_err = Some(e);
                tokio::time::sleep(BACKOFF).await;
            }
        }
    }

    Err(last_err.expect("loop runs at least once").into())
}

/// Applies the socket2-level tuning the teacher's TCP transport uses:
/// disable Nagle's algorithm so small control frames aren't delayed.
pub fn tune_socket(stream: &tokio::net::TcpStream) -> Result<()> {
    stream.set_nodelay(true)?;
    Ok(())
}
