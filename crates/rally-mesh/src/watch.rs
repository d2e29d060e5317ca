//! Liveness tracking: per-address watchdogs under one watcher.
//!
//! The watcher owns a map of watchdog tasks, one per address it has been
//! told about on the `seen` channel. Each watchdog is a 5-second inactivity
//! timer: sightings reset it, silence fires it. A fired watchdog is done;
//! the next sighting of that address gets a fresh one.

use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::sync::mpsc;
use tokio::time::timeout;

use rally_core::{AddrKey, WATCHDOG_TIMEOUT};

/// Spawn a single inactivity timer for `endpoint`.
///
/// The returned sender resets the timer. When the timer elapses the task
/// reports the endpoint on `expired` exactly once and exits; it never
/// re-arms. If the reset channel closes first the task exits silently.
fn watchdog(endpoint: SocketAddr, expired: mpsc::Sender<SocketAddr>) -> mpsc::Sender<()> {
    let (reset_tx, mut reset_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        loop {
            match timeout(WATCHDOG_TIMEOUT, reset_rx.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => return,
                Err(_elapsed) => {
                    tracing::info!(addr = %endpoint, "watchdog timeout");
                    let _ = expired.send(endpoint).await;
                    return;
                }
            }
        }
    });
    reset_tx
}

/// Spawn the watchdog supervisor.
///
/// Feeds sightings from `seen` into per-address watchdogs, lazily spawning
/// one per new address, and forwards expiries on the returned channel.
///
/// Shutdown protocol: once `seen` closes, no new watchdogs are created but
/// outstanding ones are still drained; when the last has fired, the watcher
/// exits and the returned channel closes. Every spawned watchdog is reaped
/// before that happens.
pub(crate) fn watcher(mut seen: mpsc::Receiver<SocketAddr>) -> mpsc::Receiver<SocketAddr> {
    let (timeout_tx, timeout_rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut watchdogs: HashMap<AddrKey, mpsc::Sender<()>> = HashMap::new();
        let (expired_tx, mut expired_rx) = mpsc::channel::<SocketAddr>(16);
        let mut seen_open = true;
        while seen_open || !watchdogs.is_empty() {
            tokio::select! {
                sighting = seen.recv(), if seen_open => match sighting {
                    Some(endpoint) => {
                        let reset = watchdogs
                            .entry(AddrKey::from_endpoint(endpoint))
                            .or_insert_with(|| watchdog(endpoint, expired_tx.clone()));
                        // A failed reset means the watchdog fired in the
                        // meantime; its expiry is already queued.
                        let _ = reset.send(()).await;
                    }
                    None => {
                        seen_open = false;
                        tracing::debug!(
                            outstanding = watchdogs.len(),
                            "sightings closed, draining remaining watchdogs"
                        );
                    }
                },
                Some(endpoint) = expired_rx.recv() => {
                    watchdogs.remove(&AddrKey::from_endpoint(endpoint));
                    let _ = timeout_tx.send(endpoint).await;
                }
            }
        }
        tracing::debug!("watcher exiting");
    });
    timeout_rx
}
