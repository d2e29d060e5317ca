//! Socket tasks.
//!
//! One receiver demultiplexes inbound datagrams onto the request channel;
//! one sender serializes outbound messages back to the socket. The pair
//! brackets a core task: receiver → core → sender, tied together purely by
//! channels. Closing the request channel (receiver exit) is the core's
//! shutdown signal; closing the outbound channel (core exit) is the
//! sender's.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};

use rally_core::{Message, MAX_DATAGRAM};

/// One inbound datagram: source endpoint and raw bytes.
pub(crate) type Datagram = (SocketAddr, Vec<u8>);

/// One outbound message: target endpoint and message.
pub(crate) type Outbound = (SocketAddr, Message);

/// Read datagrams off the socket and publish them on `requests`.
///
/// A read error is end-of-stream: the task exits and drops its sender,
/// which the downstream core observes as channel closure. The shutdown
/// signal produces the same orderly exit for a deliberate stop.
pub(crate) async fn receiver(
    socket: Arc<UdpSocket>,
    requests: mpsc::Sender<Datagram>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        // Fresh buffer per datagram, so the core owns its bytes without
        // aliasing a shared ring.
        let mut buf = vec![0u8; MAX_DATAGRAM];
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("shutdown signalled, receiver exiting");
                break;
            }
            result = socket.recv_from(&mut buf) => {
                let (len, from) = match result {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::info!(error = %e, "socket read failed, receiver exiting");
                        break;
                    }
                };
                buf.truncate(len);
                if requests.send((from, buf)).await.is_err() {
                    tracing::info!("request channel dropped, receiver exiting");
                    break;
                }
            }
        }
    }
}

/// Drain `outbound`, writing one datagram per message.
///
/// Write errors are logged and otherwise ignored; the transport is
/// best-effort. Exits when the channel closes, after which the façade may
/// release the socket.
pub(crate) async fn sender(socket: Arc<UdpSocket>, mut outbound: mpsc::Receiver<Outbound>) {
    while let Some((to, message)) = outbound.recv().await {
        let bytes = match message.encode() {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(%to, error = %e, "dropping unencodable message");
                continue;
            }
        };
        if let Err(e) = socket.send_to(&bytes, to).await {
            tracing::debug!(%to, error = %e, "datagram write failed");
        }
    }
    tracing::info!("outbound channel closed, sender exiting");
}
