//! Watchdog-driven decay: direct paths demote to relay, silent members
//! fall out of the server's table. These tests wait out the real window.

use std::time::{Duration, Instant};

use bytes::Bytes;
use rally_core::Message;

use crate::{start_peer, start_server, Script};

#[tokio::test]
async fn direct_path_decays_to_relay() {
    let server = Script::bind().await;
    let p2 = Script::bind().await;

    let p1 = start_peer(server.addr()).await;
    let a1 = p1.handle.local_addr();

    // Serve p1's registration with a one-entry mesh: just p2.
    let _ = server.recv_until(|_, m| matches!(m, Message::GetPeerList)).await;
    server.send(a1, &Message::PeerList { peers: vec![p2.key()] }).await;

    // p2 proves liveness once, then goes silent for good.
    let _ = p2.recv_until(|_, m| matches!(m, Message::KeepAlive)).await;
    p2.send(a1, &Message::IsAlive).await;

    // Direct phase: the payload lands straight on p2's socket.
    let direct = Bytes::from_static(&[0xab]);
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        assert!(Instant::now() < deadline, "direct payload never arrived");
        p1.broadcast.send(direct.clone()).await.expect("broadcast closed");
        match p2.recv_within(Duration::from_millis(500)).await {
            Some((from, Message::DataDirect { data })) if data == direct => {
                assert_eq!(from, a1);
                break;
            }
            _ => continue,
        }
    }

    // Silence outlasts the watchdog: p1 demotes p2 to the relay path.
    tokio::time::sleep(Duration::from_secs(6)).await;

    let relayed = Bytes::from_static(&[0xcd]);
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        assert!(Instant::now() < deadline, "relay payload never arrived");
        p1.broadcast.send(relayed.clone()).await.expect("broadcast closed");
        match server.recv_within(Duration::from_millis(500)).await {
            Some((from, Message::DataRelayTo { to, data })) if data == relayed => {
                assert_eq!(from, a1);
                assert_eq!(to, p2.key());
                break;
            }
            _ => continue,
        }
    }

    p1.handle.shutdown();
}

#[tokio::test]
async fn server_evicts_silent_members() {
    let server = start_server().await;
    let server_addr = server.local_addr();

    let c1 = Script::bind().await;
    let c2 = Script::bind().await;
    c1.send(server_addr, &Message::GetPeerList).await;
    c1.recv().await;
    c2.send(server_addr, &Message::GetPeerList).await;
    let (_, reply) = c2.recv().await;
    assert_eq!(reply, Message::PeerList { peers: vec![c1.key()] });

    // Both go quiet past the watchdog window.
    tokio::time::sleep(Duration::from_secs(6)).await;

    // c2 re-registers; c1 is gone from the mesh.
    c2.send(server_addr, &Message::GetPeerList).await;
    let (_, reply) = c2.recv().await;
    assert_eq!(reply, Message::PeerList { peers: vec![] });

    // And a relay aimed at the evicted member is dropped.
    c2.send(
        server_addr,
        &Message::DataRelayTo { to: c1.key(), data: Bytes::from_static(b"late") },
    )
    .await;
    c1.assert_no_datagram(Duration::from_secs(1)).await;

    server.shutdown();
}
