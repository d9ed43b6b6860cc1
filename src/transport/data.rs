//! Data-plane sockets: PUSH/PULL (load-balanced) and PUB/SUB
//! (broadcast, lossy on a slow subscriber).
//!
//! The receiving side of both patterns is identical — a PULL socket
//! and a SUB socket both just consume whatever frames arrive on their
//! one inbound connection. The difference between "load-balanced" and
//! "broadcast" lives entirely on the sending side: [`DataSender`]
//! round-robins across its peer connections for PUSH and fans out to
//! all of them (dropping on a full queue) for PUB. This mirrors how
//! the transport layer in this codebase already treats the wire
//! encoding as shared and pushes semantic differences into send-path
//! policy rather than duplicating socket types.

use super::codec;
use super::{tune_socket, Result, SocketOptions, TransportError};
use futures::FutureExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A data-plane payload shared across peer connections without a
/// per-peer copy. Whether a caller hands the *same* `Arc` to every
/// message (true zero-copy: one allocation, reference-counted) or a
/// freshly copied one each time (`config.zero_copy == false`, the
/// deliberate baseline) is a decision made by the sender loop in
/// `worker.rs`, not by this transport layer.
pub type Payload = Arc<[u8]>;

/// How a [`DataSender`] fans a message out across its peer connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutMode {
    /// PUSH: exactly one peer receives each message, chosen round-robin.
    RoundRobin,
    /// PUB: every peer receives each message, or misses it if its
    /// queue is full.
    Broadcast,
}

struct PeerHandle {
    tx: mpsc::Sender<Payload>,
    _writer: JoinHandle<()>,
}

/// The sending half of a data-plane group: either a PUSH or a PUB
/// socket, bound once and accepting `k` peers, or connected out to
/// `k` explicit peer addresses, per the sender-bind discipline in the
/// component design.
pub struct DataSender {
    peers: Vec<PeerHandle>,
    mode: FanoutMode,
    rr_cursor: usize,
}

impl DataSender {
    pub async fn bind_and_accept(
        addr: SocketAddr,
        expected_peers: usize,
        mode: FanoutMode,
        options: SocketOptions,
    ) -> Result<Self> {
        let listener = super::bind_with_retry(addr).await?;
        let mut peers = Vec::with_capacity(expected_peers);
        for _ in 0..expected_peers {
            let (stream, _remote) = listener.accept().await?;
            tune_socket(&stream)?;
            peers.push(spawn_peer_writer(stream, options));
        }
        Ok(Self {
            peers,
            mode,
            rr_cursor: 0,
        })
    }

    pub async fn connect_to(
        addrs: &[SocketAddr],
        mode: FanoutMode,
        options: SocketOptions,
    ) -> Result<Self> {
        let mut peers = Vec::with_capacity(addrs.len());
        for addr in addrs {
            // The peer on the other end may not have finished binding its
            // side of the data socket yet: both workers configure on the
            // same broadcast CONFIG with no ordering guarantee between them.
            let stream = super::connect_with_retry(*addr).await?;
            tune_socket(&stream)?;
            peers.push(spawn_peer_writer(stream, options));
        }
        Ok(Self {
            peers,
            mode,
            rr_cursor: 0,
        })
    }

    /// Blocking send (backpressures on a full PUSH queue; for
    /// Broadcast mode this still blocks on the slowest peer's queue
    /// becoming available, since the measured send path is never
    /// meant to silently drop — dropping is reserved for the
    /// END-drain's explicit non-blocking path).
    ///
    /// Takes an already-built [`Payload`]: handing the same `Arc` in
    /// on every call is what makes a zero-copy test actually
    /// zero-copy — fanning out to every peer here clones only the
    /// reference count, never the bytes.
    pub async fn send(&mut self, payload: Payload) -> Result<()> {
        if self.peers.is_empty() {
            return Err(TransportError::Protocol("no connected peers".into()));
        }
        match self.mode {
            FanoutMode::RoundRobin => {
                let idx = self.rr_cursor % self.peers.len();
                self.rr_cursor = self.rr_cursor.wrapping_add(1);
                self.peers[idx]
                    .tx
                    .send(payload)
                    .await
                    .map_err(|_| TransportError::ConnectionClosed)
            }
            FanoutMode::Broadcast => {
                for peer in &self.peers {
                    // A full queue here is a genuine drop: PUB/SUB is
                    // lossy on a slow subscriber by design.
                    let _ = peer.tx.try_send(payload.clone());
                }
                Ok(())
            }
        }
    }

    /// Non-blocking send used by the sender's END-drain loop: tries
    /// every peer once, ignoring would-block, and never awaits.
    pub fn try_send(&mut self, payload: Payload) -> Result<()> {
        if self.peers.is_empty() {
            return Ok(());
        }
        match self.mode {
            FanoutMode::RoundRobin => {
                let idx = self.rr_cursor % self.peers.len();
                self.rr_cursor = self.rr_cursor.wrapping_add(1);
                let _ = self.peers[idx].tx.try_send(payload);
                Ok(())
            }
            FanoutMode::Broadcast => {
                for peer in &self.peers {
                    let _ = peer.tx.try_send(payload.clone());
                }
                Ok(())
            }
        }
    }
}

fn spawn_peer_writer(stream: TcpStream, options: SocketOptions) -> PeerHandle {
    let (tx, mut rx) = mpsc::channel::<Payload>(options.send_hwm.max(1));
    let writer = tokio::spawn(async move {
        let mut stream = stream;
        while let Some(payload) = rx.recv().await {
            if codec::write_single(&mut stream, &payload).await.is_err() {
                break;
            }
        }
    });
    PeerHandle { tx, _writer: writer }
}

/// The receiving half of a data-plane group: one connection, read one
/// frame at a time. Used for both PULL and SUB — from the receiver's
/// point of view load-balancing and broadcasting look identical.
pub struct DataReceiver {
    stream: TcpStream,
}

impl DataReceiver {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = super::connect_with_retry(addr).await?;
        tune_socket(&stream)?;
        Ok(Self { stream })
    }

    pub async fn bind_and_accept_one(addr: SocketAddr) -> Result<Self> {
        let listener = super::bind_with_retry(addr).await?;
        let (stream, _remote) = listener.accept().await?;
        tune_socket(&stream)?;
        Ok(Self { stream })
    }

    /// Reads one data-plane message (single-part frame). Returns the
    /// raw payload bytes, which callers compare against the 3-byte
    /// `END` marker themselves rather than this layer special-casing
    /// it — payload length is not assumed anywhere below the caller.
    pub async fn recv(&mut self) -> Result<Vec<u8>> {
        let mut frame = codec::read_frame(&mut self.stream).await?;
        frame
            .pop()
            .ok_or_else(|| TransportError::Protocol("empty data frame".into()))
    }

    pub fn try_recv(&mut self) -> Result<Option<Vec<u8>>> {
        match codec::read_frame(&mut self.stream).now_or_never() {
            Some(Ok(mut frame)) => Ok(Some(frame.pop().unwrap_or_default())),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::new(Ipv4Addr::LOCALHOST.into(), port)
    }

    #[tokio::test]
    async fn push_pull_round_trips_one_message() {
        let listener = TcpListener::bind(loopback(0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let sender_task = {
            let addr = addr;
            tokio::spawn(async move {
                let mut sender = DataSender::bind_and_accept(
                    addr,
                    1,
                    FanoutMode::RoundRobin,
                    SocketOptions::default(),
                )
                .await
                .unwrap();
                sender.send(Arc::from(vec![1u8, 2, 3])).await.unwrap();
            })
        };

        let mut receiver = DataReceiver::connect(addr).await.unwrap();
        let payload = receiver.recv().await.unwrap();
        assert_eq!(payload, vec![1, 2, 3]);
        sender_task.await.unwrap();
    }

    #[tokio::test]
    async fn push_round_robins_across_many_to_one_group() {
        let listener = TcpListener::bind(loopback(0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let sender_task = tokio::spawn(async move {
            let mut sender = DataSender::bind_and_accept(
                addr,
                2,
                FanoutMode::RoundRobin,
                SocketOptions::default(),
            )
            .await
            .unwrap();
            for i in 0..4u8 {
                sender.send(Arc::from(vec![i])).await.unwrap();
            }
        });

        let mut r1 = DataReceiver::connect(addr).await.unwrap();
        let mut r2 = DataReceiver::connect(addr).await.unwrap();

        let a = r1.recv().await.unwrap();
        let b = r2.recv().await.unwrap();
        let c = r1.recv().await.unwrap();
        let d = r2.recv().await.unwrap();

        let mut received: Vec<u8> = vec![a[0], b[0], c[0], d[0]];
        received.sort();
        assert_eq!(received, vec![0, 1, 2, 3]);
        sender_task.await.unwrap();
    }
}
