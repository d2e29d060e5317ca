//! Cascade shutdown and the broadcast half-close.

use std::time::Duration;

use rally_core::Message;
use tokio::time::timeout;

use crate::{start_peer, start_server, Script};

#[tokio::test]
async fn server_shutdown_drains_and_completes() {
    let mut server = start_server().await;
    let server_addr = server.local_addr();

    // One member with an outstanding watchdog: the cascade has real work
    // to drain.
    let member = Script::bind().await;
    member.send(server_addr, &Message::GetPeerList).await;
    member.recv().await;

    server.shutdown();
    // Bounded by the watchdog window plus slack.
    timeout(Duration::from_secs(10), server.wait())
        .await
        .expect("shutdown cascade hung");

    // The socket is gone: nothing answers a new join.
    member.send(server_addr, &Message::GetPeerList).await;
    member.assert_no_datagram(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn idle_peer_shutdown_is_prompt() {
    let rendezvous = Script::bind().await;
    let mut peer = start_peer(rendezvous.addr()).await;

    peer.handle.shutdown();
    // No watchdogs outstanding: nothing to drain.
    timeout(Duration::from_secs(3), peer.handle.wait())
        .await
        .expect("idle shutdown hung");

    // The delivery channel closes as part of the cascade.
    assert!(peer.delivery.recv().await.is_none());
}

#[tokio::test]
async fn broadcast_half_close_keeps_the_peer_serving() {
    let rendezvous = Script::bind().await;
    let peer = start_peer(rendezvous.addr()).await;
    let peer_addr = peer.handle.local_addr();

    drop(peer.broadcast);

    // Refresh ticks keep coming after the half-close...
    let _ = rendezvous.recv_until(|_, m| matches!(m, Message::GetPeerList)).await;
    let _ = rendezvous.recv_until(|_, m| matches!(m, Message::GetPeerList)).await;

    // ...and inbound probes are still answered.
    rendezvous.send(peer_addr, &Message::KeepAlive).await;
    let (from, reply) = rendezvous
        .recv_until(|_, m| matches!(m, Message::IsAlive))
        .await;
    assert_eq!(from, peer_addr);
    assert_eq!(reply, Message::IsAlive);

    peer.handle.shutdown();
}
