//! rallyd, the rally rendezvous server daemon.
//!
//! Peers register here, learn about each other, and fall back to this
//! process as a relay for peers they cannot reach directly.
//!
//!   rallyd [listen_addr]
//!
//! The listen address comes from the argument, else `RALLY_SERVER__LISTEN`,
//! else the config file, else 0.0.0.0:4700.

use anyhow::{Context, Result};

use rally_core::config::RallyConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = RallyConfig::load().context("failed to load configuration")?;
    let listen = std::env::args().nth(1).unwrap_or(config.server.listen);

    let mut server = rally_mesh::spawn_server(&listen).await?;
    tracing::info!(addr = %server.local_addr(), "rendezvous server up");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for interrupt")?;
            tracing::info!("interrupt received, shutting down");
        }
        _ = server.wait() => {
            tracing::warn!("server stopped on its own");
            return Ok(());
        }
    }

    server.shutdown();
    server.wait().await;
    Ok(())
}
