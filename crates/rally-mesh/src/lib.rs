//! rally-mesh: runtime for the rally UDP mesh.
//!
//! Two entry points share the same plumbing. [`spawn_server`] runs a
//! rendezvous server: peers register with it, learn about each other, and
//! use it as a relay of last resort. [`spawn_peer`] runs a mesh peer: it
//! registers with a server, probes the peers it learns about, and
//! broadcasts application payloads over the cheapest working path per peer.
//!
//! Everything is tasks wired by channels. Shutdown is a cascade of channel
//! closures, never an abort: receiver → core → watcher → sender → socket,
//! each task draining its remaining work on the way out.

mod io;
mod peer;
mod server;
mod watch;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

pub use peer::Delivery;

/// Default capacity for the plumbing channels. Small on purpose: producers
/// block on slow consumers rather than queueing unboundedly.
const CHANNEL_CAPACITY: usize = 16;

/// Control surface for a running mesh node (server or peer).
///
/// Dropping the handle also starts the shutdown cascade: the receiver
/// treats the loss of its last shutdown sender like a shutdown signal.
pub struct Handle {
    local_addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
    done: Option<JoinHandle<()>>,
}

impl Handle {
    /// The address the node's socket actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start an orderly shutdown. Returns immediately; the cascade runs in
    /// the background. Use [`Handle::wait`] to observe completion.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Wait until every task has drained and the socket is closed.
    /// Resolves immediately on later calls; safe to race in a `select!`.
    pub async fn wait(&mut self) {
        if let Some(done) = &mut self.done {
            let result = done.await;
            self.done = None;
            if let Err(e) = result {
                tracing::warn!(error = %e, "completion task failed");
            }
        }
    }
}

/// A running mesh peer: the broadcast input, the tagged delivery output,
/// and the control handle.
///
/// Dropping `broadcast` (and every clone of it) is a half-close: the peer
/// stops accepting broadcasts but keeps serving inbound traffic until
/// [`Handle::shutdown`].
pub struct PeerHandle {
    pub broadcast: mpsc::Sender<Bytes>,
    pub delivery: mpsc::Receiver<Delivery>,
    pub handle: Handle,
}

/// Resolve a "host:port" string to a single UDP endpoint.
async fn resolve(addr: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(addr)
        .await
        .with_context(|| format!("failed to resolve '{addr}'"))?
        .next()
        .with_context(|| format!("'{addr}' resolved to no addresses"))
}

async fn bind(addr: &str) -> Result<Arc<UdpSocket>> {
    let endpoint = resolve(addr).await?;
    let socket = UdpSocket::bind(endpoint)
        .await
        .with_context(|| format!("failed to bind UDP socket on {endpoint}"))?;
    Ok(Arc::new(socket))
}

/// Completion supervisor: awaits the sender task, then releases the last
/// socket reference so the socket is closed exactly once.
fn supervise(socket: Arc<UdpSocket>, sender_task: JoinHandle<()>, local_addr: SocketAddr) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = sender_task.await {
            tracing::warn!(error = %e, "sender task failed");
        }
        drop(socket);
        tracing::info!(addr = %local_addr, "socket closed, node stopped");
    })
}

/// Start a rendezvous server bound to `bind_addr` ("host:port").
///
/// Resolution and bind failures are fatal. The returned [`Handle`] controls
/// and observes the running server.
pub async fn spawn_server(bind_addr: &str) -> Result<ServerHandle> {
    let socket = bind(bind_addr).await?;
    let local_addr = socket.local_addr().context("failed to read bound address")?;
    tracing::info!(addr = %local_addr, "rendezvous server socket bound");

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let (request_tx, request_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (response_tx, response_rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(io::receiver(socket.clone(), request_tx, shutdown_rx));
    tokio::spawn(server::run(request_rx, response_tx));
    let sender_task = tokio::spawn(io::sender(socket.clone(), response_rx));
    let done = supervise(socket, sender_task, local_addr);

    Ok(Handle {
        local_addr,
        shutdown: shutdown_tx,
        done: Some(done),
    })
}

/// A server's handle is just the control surface; servers have no
/// application-facing channels.
pub type ServerHandle = Handle;

/// Start a mesh peer bound to `local_addr`, registering with the
/// rendezvous server at `server_addr` (both "host:port").
///
/// Resolution and bind failures are fatal. The peer starts its refresh
/// cycle immediately; deliveries appear on `delivery` as soon as known
/// peers send payloads.
pub async fn spawn_peer(local_addr: &str, server_addr: &str) -> Result<PeerHandle> {
    let server = resolve(server_addr).await?;
    let socket = bind(local_addr).await?;
    let local_addr = socket.local_addr().context("failed to read bound address")?;
    tracing::info!(addr = %local_addr, server = %server, "peer socket bound");

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let (request_tx, request_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (response_tx, response_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (broadcast_tx, broadcast_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (delivery_tx, delivery_rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(io::receiver(socket.clone(), request_tx, shutdown_rx));
    tokio::spawn(peer::run(server, request_rx, broadcast_rx, response_tx, delivery_tx));
    let sender_task = tokio::spawn(io::sender(socket.clone(), response_rx));
    let done = supervise(socket, sender_task, local_addr);

    Ok(PeerHandle {
        broadcast: broadcast_tx,
        delivery: delivery_rx,
        handle: Handle {
            local_addr,
            shutdown: shutdown_tx,
            done: Some(done),
        },
    })
}
