//! Configuration for the rally executables.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $RALLY_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/rally/config.toml
//!   3. ~/.config/rally/config.toml
//!
//! Protocol timers are deliberately absent: they are wire-format constants
//! (see [`crate::wire`]), not deployment knobs.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RallyConfig {
    pub server: ServerConfig,
    pub peer: PeerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// "host:port" the rendezvous server binds to.
    pub listen: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// "host:port" the peer binds locally. Port 0 = OS-assigned.
    pub local: String,
    /// "host:port" of the rendezvous server to register with.
    pub server: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for RallyConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            peer: PeerConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:4700".to_string(),
        }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            local: "0.0.0.0:0".to_string(),
            server: "127.0.0.1:4700".to_string(),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl RallyConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            RallyConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("RALLY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Apply RALLY_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("RALLY_SERVER__LISTEN") {
            self.server.listen = v;
        }
        if let Ok(v) = std::env::var("RALLY_PEER__LOCAL") {
            self.peer.local = v;
        }
        if let Ok(v) = std::env::var("RALLY_PEER__SERVER") {
            self.peer.server = v;
        }
    }
}

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_or_tmp().join(".config"))
        .join("rally")
}

fn home_or_tmp() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
