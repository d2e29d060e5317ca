//! Mesh peer core.
//!
//! Keeps the identity table (`peer_ids`) learned from the rendezvous
//! server's peer lists, tracks which of those peers have proven liveness
//! (`alive`), refreshes both on a fixed period, and fans application
//! broadcasts out over the cheapest path per peer: direct datagrams to
//! alive peers, server relay to the rest.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::sync::mpsc;

use rally_core::{AddrKey, Message, REFRESH_INTERVAL};

use crate::io::{Datagram, Outbound};
use crate::watch;

/// One payload delivered to the application, tagged with the stable id of
/// the peer it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub peer_id: u32,
    pub payload: Bytes,
}

struct PeerState {
    /// Stable small ids for every address in the latest peer list. An id is
    /// never reused for a different address while its address stays listed.
    peer_ids: HashMap<AddrKey, u32>,
    next_peer_id: u32,
    /// Peers that answered a probe inside the watchdog window. Always a
    /// subset of `peer_ids` except transiently after a shrinking peer list.
    alive: HashSet<AddrKey>,
}

/// Run the peer event loop.
///
/// `broadcasts` closing is a half-close: the loop keeps serving inbound
/// traffic. `requests` closing starts the shutdown cascade; the loop exits
/// once the watcher has drained, closing `responses` and `deliveries`.
pub(crate) async fn run(
    server: SocketAddr,
    mut requests: mpsc::Receiver<Datagram>,
    mut broadcasts: mpsc::Receiver<Bytes>,
    responses: mpsc::Sender<Outbound>,
    deliveries: mpsc::Sender<Delivery>,
) {
    let (seen_tx, seen_rx) = mpsc::channel(16);
    let mut timeouts = watch::watcher(seen_rx);
    let mut seen_alive = Some(seen_tx);
    let mut state = PeerState {
        peer_ids: HashMap::new(),
        next_peer_id: 0,
        alive: HashSet::new(),
    };
    let mut tick = tokio::time::interval(REFRESH_INTERVAL);
    let mut requests_open = true;
    let mut timeouts_open = true;
    let mut broadcasts_open = true;

    while requests_open || timeouts_open {
        tokio::select! {
            _ = tick.tick() => {
                let _ = responses.send((server, Message::GetPeerList)).await;
                for key in state.peer_ids.keys() {
                    let _ = responses.send((key.endpoint(), Message::KeepAlive)).await;
                }
                tracing::trace!(known = state.peer_ids.len(), alive = state.alive.len(), "refresh tick");
            }
            expired = timeouts.recv(), if timeouts_open => match expired {
                Some(endpoint) => {
                    state.alive.remove(&AddrKey::from_endpoint(endpoint));
                    tracing::info!(addr = %endpoint, "peer went quiet, demoted to relay path");
                }
                None => timeouts_open = false,
            },
            data = broadcasts.recv(), if broadcasts_open => match data {
                Some(payload) => state.fan_out(payload, server, &responses).await,
                None => {
                    broadcasts_open = false;
                    tracing::info!("broadcast input closed, serving inbound only");
                }
            },
            request = requests.recv(), if requests_open => match request {
                Some((from, datagram)) => {
                    state
                        .handle(from, &datagram, seen_alive.as_ref(), &responses, &deliveries)
                        .await;
                }
                None => {
                    requests_open = false;
                    seen_alive = None;
                    tracing::info!("requests closed, draining watcher");
                }
            },
        }
    }
    tracing::info!("peer core exiting");
}

impl PeerState {
    async fn handle(
        &mut self,
        from: SocketAddr,
        datagram: &[u8],
        seen_alive: Option<&mpsc::Sender<SocketAddr>>,
        responses: &mpsc::Sender<Outbound>,
        deliveries: &mpsc::Sender<Delivery>,
    ) {
        let message = match Message::decode(datagram) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(addr = %from, error = %e, "dropping undecodable datagram");
                return;
            }
        };
        match message {
            Message::PeerList { peers } => self.replace_peer_list(peers),
            Message::KeepAlive => {
                let _ = responses.send((from, Message::IsAlive)).await;
            }
            Message::IsAlive => {
                // The only message that counts toward liveness.
                self.alive.insert(AddrKey::from_endpoint(from));
                if let Some(seen) = seen_alive {
                    let _ = seen.send(from).await;
                }
            }
            Message::DataRelayedFrom { from: origin, data } => {
                match self.peer_ids.get(&origin) {
                    Some(&peer_id) => {
                        let _ = deliveries.send(Delivery { peer_id, payload: data }).await;
                    }
                    None => {
                        tracing::debug!(origin = %origin, "relayed payload from unknown peer, dropping");
                    }
                }
            }
            Message::DataDirect { data } => {
                match self.peer_ids.get(&AddrKey::from_endpoint(from)) {
                    Some(&peer_id) => {
                        let _ = deliveries.send(Delivery { peer_id, payload: data }).await;
                    }
                    None => {
                        tracing::debug!(addr = %from, "direct payload from unknown peer, dropping");
                    }
                }
            }
            other => {
                tracing::debug!(addr = %from, message = ?other, "not a peer request, ignoring");
            }
        }
    }

    /// Rebuild `peer_ids` over exactly the listed addresses, keeping the id
    /// of every survivor and minting fresh ids for newcomers. Dropped
    /// addresses lose their id for good; `alive` is left to decay through
    /// the watcher.
    fn replace_peer_list(&mut self, peers: Vec<AddrKey>) {
        let mut next = HashMap::with_capacity(peers.len());
        for key in peers {
            let id = match self.peer_ids.get(&key) {
                Some(&id) => id,
                None => {
                    let id = self.next_peer_id;
                    self.next_peer_id += 1;
                    tracing::debug!(peer = %key, id, "new peer");
                    id
                }
            };
            next.insert(key, id);
        }
        self.peer_ids = next;
    }

    /// Send `payload` to every known peer: directly when the peer has
    /// proven liveness, through the server relay otherwise.
    async fn fan_out(&self, payload: Bytes, server: SocketAddr, responses: &mpsc::Sender<Outbound>) {
        for key in self.peer_ids.keys() {
            // Bytes is immutable, so sharing the allocation is as good as
            // the defensive copy a mutable buffer would need.
            let data = payload.clone();
            let outbound = if self.alive.contains(key) {
                (key.endpoint(), Message::DataDirect { data })
            } else {
                (server, Message::DataRelayTo { to: *key, data })
            };
            let _ = responses.send(outbound).await;
        }
    }
}
