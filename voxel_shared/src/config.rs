//! Configuration system.
//!
//! Loads relay configuration from JSON strings and the environment (file IO left to app).

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Environment variable that overrides the listen port.
pub const PORT_ENV: &str = "PORT";

/// Root configuration for the relay server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// TCP port the WebSocket listener binds to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Interface to bind, e.g. `0.0.0.0`.
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    /// Directory holding the persisted world; created on demand.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// File name of the persisted world inside `data_dir`.
    #[serde(default = "default_world_file")]
    pub world_file: String,
    /// Quiet period before a burst of block edits is written out.
    #[serde(default = "default_persist_debounce_ms")]
    pub persist_debounce_ms: u64,
    /// Interval between liveness pings.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

fn default_port() -> u16 {
    8080
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_world_file() -> String {
    "world.json".to_string()
}

fn default_persist_debounce_ms() -> u64 {
    250
}

fn default_heartbeat_secs() -> u64 {
    30
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_host: default_bind_host(),
            data_dir: default_data_dir(),
            world_file: default_world_file(),
            persist_debounce_ms: default_persist_debounce_ms(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

impl RelayConfig {
    /// Parses config from JSON. Missing fields take their defaults.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Defaults with the port taken from `PORT` when it is set and parses.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_port_var(std::env::var(PORT_ENV).ok().as_deref());
        cfg
    }

    fn apply_port_var(&mut self, value: Option<&str>) {
        if let Some(port) = value.and_then(|v| v.trim().parse().ok()) {
            self.port = port;
        }
    }

    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.bind_host, self.port)
            .parse()
            .with_context(|| format!("parse listen address {}:{}", self.bind_host, self.port))
    }

    /// Full path of the persisted world document.
    pub fn world_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(&self.world_file)
    }

    pub fn persist_debounce(&self) -> Duration {
        Duration::from_millis(self.persist_debounce_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }
}
