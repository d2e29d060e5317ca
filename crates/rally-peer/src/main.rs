//! rally-peer, a mesh peer on the command line.
//!
//! Joins the mesh at the configured rendezvous server, broadcasts every
//! stdin line to all known peers, and prints every delivered payload
//! prefixed with the sending peer's id.
//!
//!   rally-peer [local_addr] [server_addr]
//!
//! Addresses come from the arguments, else `RALLY_PEER__LOCAL` /
//! `RALLY_PEER__SERVER`, else the config file, else 0.0.0.0:0 and
//! 127.0.0.1:4700.
//!
//! Closing stdin stops the broadcast side but keeps receiving; ctrl-c
//! shuts the peer down.

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::io::AsyncBufReadExt;

use rally_core::config::RallyConfig;
use rally_mesh::PeerHandle;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = RallyConfig::load().context("failed to load configuration")?;
    let mut args = std::env::args().skip(1);
    let local = args.next().unwrap_or(config.peer.local);
    let server = args.next().unwrap_or(config.peer.server);

    let PeerHandle {
        broadcast,
        mut delivery,
        mut handle,
    } = rally_mesh::spawn_peer(&local, &server).await?;
    tracing::info!(addr = %handle.local_addr(), server = %server, "peer up");

    // Stdin feeds the broadcast side. EOF drops the sender: the peer stops
    // broadcasting but keeps receiving.
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if broadcast.send(Bytes::from(line.into_bytes())).await.is_err() {
                break;
            }
        }
        tracing::info!("stdin closed, broadcasting stopped");
    });

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for interrupt")?;
                tracing::info!("interrupt received, shutting down");
                break;
            }
            delivered = delivery.recv() => match delivered {
                Some(message) => {
                    println!("[{}] {}", message.peer_id, String::from_utf8_lossy(&message.payload));
                }
                None => {
                    tracing::warn!("peer stopped on its own");
                    break;
                }
            },
        }
    }

    handle.shutdown();
    handle.wait().await;
    Ok(())
}
