//! Rendezvous server core.
//!
//! Holds the membership table and answers two requests: `GetPeerList`
//! registers the sender and returns the other members, `DataRelayTo`
//! forwards a payload to a member on the sender's behalf. Membership decays
//! through the watcher: an address that stays silent for the watchdog
//! window is evicted.

use std::collections::HashSet;
use std::net::SocketAddr;

use tokio::sync::mpsc;

use rally_core::{AddrKey, Message};

use crate::io::{Datagram, Outbound};
use crate::watch;

/// Run the server event loop until the request channel closes and the
/// watcher has drained. Dropping `responses` on exit shuts the sender down.
pub(crate) async fn run(mut requests: mpsc::Receiver<Datagram>, responses: mpsc::Sender<Outbound>) {
    let (seen_tx, seen_rx) = mpsc::channel(16);
    let mut timeouts = watch::watcher(seen_rx);
    let mut seen = Some(seen_tx);
    let mut members: HashSet<AddrKey> = HashSet::new();
    let mut requests_open = true;
    let mut timeouts_open = true;

    while requests_open || timeouts_open {
        tokio::select! {
            expired = timeouts.recv(), if timeouts_open => match expired {
                Some(endpoint) => {
                    members.remove(&AddrKey::from_endpoint(endpoint));
                    tracing::info!(addr = %endpoint, members = members.len(), "member evicted");
                }
                None => timeouts_open = false,
            },
            request = requests.recv(), if requests_open => match request {
                Some((from, datagram)) => {
                    handle(&mut members, from, &datagram, seen.as_ref(), &responses).await;
                }
                None => {
                    requests_open = false;
                    // Dropping `seen` tells the watcher to reap its
                    // watchdogs and, eventually, close `timeouts`.
                    seen = None;
                    tracing::info!("requests closed, draining watcher");
                }
            },
        }
    }
    tracing::info!("server core exiting");
}

async fn handle(
    members: &mut HashSet<AddrKey>,
    from: SocketAddr,
    datagram: &[u8],
    seen: Option<&mpsc::Sender<SocketAddr>>,
    responses: &mpsc::Sender<Outbound>,
) {
    let message = match Message::decode(datagram) {
        Ok(m) => m,
        Err(e) => {
            // Malformed traffic does not count as liveness: decode comes
            // before the seen signal.
            tracing::debug!(addr = %from, error = %e, "dropping undecodable datagram");
            return;
        }
    };
    if let Some(seen) = seen {
        let _ = seen.send(from).await;
    }

    let from_key = AddrKey::from_endpoint(from);
    match message {
        Message::GetPeerList => {
            members.insert(from_key);
            let peers: Vec<AddrKey> = members
                .iter()
                .copied()
                .filter(|key| *key != from_key)
                .collect();
            tracing::debug!(addr = %from, others = peers.len(), "member registered");
            let _ = responses.send((from, Message::PeerList { peers })).await;
        }
        Message::DataRelayTo { to, data } => {
            if members.contains(&to) {
                tracing::debug!(from = %from, to = %to, len = data.len(), "relaying payload");
                let relayed = Message::DataRelayedFrom { from: from_key, data };
                let _ = responses.send((to.endpoint(), relayed)).await;
            } else {
                tracing::debug!(from = %from, to = %to, "relay target is not a member, dropping");
            }
        }
        other => {
            tracing::debug!(addr = %from, message = ?other, "not a server request, ignoring");
        }
    }
}
