//! Rally integration test harness.
//!
//! Every test builds a real topology on loopback UDP sockets. Where a
//! scenario needs a scripted counterparty, a bare socket speaks the wire
//! codec directly and the test plays server or peer as the scenario
//! requires.
//!
//! The liveness scenarios wait out the real 5-second watchdog window, so
//! this suite takes tens of seconds.

mod liveness;
mod shutdown;

use std::net::SocketAddr;
use std::time::Duration;

use rally_core::{AddrKey, Message, MAX_DATAGRAM};
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// How long a test waits for an expected datagram before giving up.
pub const RECV_DEADLINE: Duration = Duration::from_secs(10);

// ── Harness ───────────────────────────────────────────────────────────────────

/// A scripted protocol participant: a bare loopback socket speaking the
/// wire codec.
pub struct Script {
    socket: UdpSocket,
}

impl Script {
    pub async fn bind() -> Script {
        let socket = UdpSocket::bind("127.0.0.1:0")
            .await
            .expect("failed to bind scripted socket");
        Script { socket }
    }

    pub fn addr(&self) -> SocketAddr {
        self.socket.local_addr().expect("scripted socket has no address")
    }

    pub fn key(&self) -> AddrKey {
        AddrKey::from_endpoint(self.addr())
    }

    pub async fn send(&self, to: SocketAddr, message: &Message) {
        let bytes = message.encode().expect("encode failed");
        self.socket.send_to(&bytes, to).await.expect("send failed");
    }

    /// Send raw bytes, bypassing the codec, for malformed-input scenarios.
    pub async fn socket_send_raw(&self, to: SocketAddr, bytes: &[u8]) {
        self.socket.send_to(bytes, to).await.expect("send failed");
    }

    /// Receive and decode one message, panicking after [`RECV_DEADLINE`].
    pub async fn recv(&self) -> (SocketAddr, Message) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, from) = timeout(RECV_DEADLINE, self.socket.recv_from(&mut buf))
            .await
            .expect("timed out waiting for a datagram")
            .expect("recv failed");
        (from, Message::decode(&buf[..len]).expect("undecodable datagram"))
    }

    /// Receive and decode one message, or None if `window` passes quietly.
    pub async fn recv_within(&self, window: Duration) -> Option<(SocketAddr, Message)> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        match timeout(window, self.socket.recv_from(&mut buf)).await {
            Ok(result) => {
                let (len, from) = result.expect("recv failed");
                Some((from, Message::decode(&buf[..len]).expect("undecodable datagram")))
            }
            Err(_) => None,
        }
    }

    /// Receive until `pred` accepts a message, discarding everything else
    /// (refresh chatter, duplicate probes).
    pub async fn recv_until(
        &self,
        mut pred: impl FnMut(&SocketAddr, &Message) -> bool,
    ) -> (SocketAddr, Message) {
        loop {
            let (from, message) = self.recv().await;
            if pred(&from, &message) {
                return (from, message);
            }
        }
    }

    /// Assert that no datagram at all arrives within `window`.
    pub async fn assert_no_datagram(&self, window: Duration) {
        if let Some((from, message)) = self.recv_within(window).await {
            panic!("unexpected datagram from {from}: {message:?}");
        }
    }
}

/// Spawn a rendezvous server on an ephemeral loopback port.
pub async fn start_server() -> rally_mesh::ServerHandle {
    rally_mesh::spawn_server("127.0.0.1:0")
        .await
        .expect("failed to start server")
}

/// Spawn a peer on an ephemeral loopback port, pointed at `server`.
pub async fn start_peer(server: SocketAddr) -> rally_mesh::PeerHandle {
    rally_mesh::spawn_peer("127.0.0.1:0", &server.to_string())
        .await
        .expect("failed to start peer")
}
