// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Client configuration.
//!
//! Configuration is stored in `pillar.toml`:
//!
//! ```toml
//! user_id = "u-42"
//!
//! [remote]
//! url = "wss://sync.example.com/ws"
//! reconnect_max_retries = 10
//!
//! [sync]
//! conflict_policy = "merge"
//! ```
//!
//! Without a `[remote]` section the client runs in local-only mode.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pillar_core::ConflictPolicy;
use serde::{Deserialize, Serialize};

use crate::connection::ConnectionConfig;
use crate::env;
use crate::error::{Error, Result};

pub const CONFIG_FILE_NAME: &str = "pillar.toml";
const STATE_DIR_NAME: &str = "pillar";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identity stamped on outgoing events.
    #[serde(default = "default_user_id")]
    pub user_id: String,
    /// Live backend (optional - if absent, runs in local-only mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteConfig>,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Remote backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// WebSocket URL (`ws://...` or `wss://...`).
    pub url: String,
    /// Consecutive failed connections before giving up (default: 10). Must be at least 1.
    #[serde(default = "default_reconnect_max_retries")]
    pub reconnect_max_retries: u32,
    /// Initial delay for exponential backoff in milliseconds (default: 500).
    #[serde(default = "default_reconnect_initial_delay_ms")]
    pub reconnect_initial_delay_ms: u64,
    /// Maximum delay between reconnection attempts in seconds (default: 30).
    #[serde(default = "default_reconnect_max_delay_secs")]
    pub reconnect_max_delay_secs: u64,
    /// Heartbeat ping interval in milliseconds (default: 30000). 0 = disabled.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Max time for a single connection attempt in seconds (default: 10).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    /// Request a full sync on connect when the last sync is older than this
    /// many seconds (default: 86400). 0 = never.
    #[serde(default = "default_full_sync_after_secs")]
    pub full_sync_after_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            conflict_policy: ConflictPolicy::default(),
            full_sync_after_secs: default_full_sync_after_secs(),
        }
    }
}

fn default_user_id() -> String {
    "local".to_string()
}

fn default_reconnect_max_retries() -> u32 {
    10
}

fn default_reconnect_initial_delay_ms() -> u64 {
    500
}

fn default_reconnect_max_delay_secs() -> u64 {
    30
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_full_sync_after_secs() -> u64 {
    86_400
}

impl RemoteConfig {
    pub fn new(url: impl Into<String>) -> Self {
        RemoteConfig {
            url: url.into(),
            reconnect_max_retries: default_reconnect_max_retries(),
            reconnect_initial_delay_ms: default_reconnect_initial_delay_ms(),
            reconnect_max_delay_secs: default_reconnect_max_delay_secs(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }

    /// Returns an error message if the remote settings are unusable.
    pub fn validate(&self) -> Option<String> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Some(format!(
                "invalid remote URL '{}': must be ws:// or wss://",
                self.url
            ));
        }
        if self.reconnect_max_retries == 0 {
            return Some("reconnect_max_retries must be at least 1".to_string());
        }
        if self.connect_timeout_secs == 0 {
            return Some("connect_timeout_secs must be at least 1".to_string());
        }
        None
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.url.clone(),
            max_retries: self.reconnect_max_retries.max(1),
            initial_delay: Duration::from_millis(self.reconnect_initial_delay_ms),
            max_delay: Duration::from_secs(self.reconnect_max_delay_secs),
            heartbeat_interval: match self.heartbeat_interval_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            user_id: default_user_id(),
            remote: None,
            sync: SyncConfig::default(),
        }
    }
}

impl Config {
    /// Resolves the config file: explicit path, then `PILLAR_CONFIG`, then
    /// `pillar.toml` in the state directory.
    pub fn locate(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }
        if let Some(path) = env::config_path() {
            return Ok(path);
        }
        Ok(state_dir()?.join(CONFIG_FILE_NAME))
    }

    /// Loads and validates configuration. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
            Err(e) => return Err(Error::Config(format!("failed to read config: {}", e))),
        };
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("failed to parse config: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(Error::Config("user_id must not be empty".to_string()));
        }
        if let Some(message) = self.remote.as_ref().and_then(RemoteConfig::validate) {
            return Err(Error::Config(message));
        }
        Ok(())
    }

    /// Saves configuration to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Returns true if a remote backend is configured.
    pub fn is_remote_mode(&self) -> bool {
        self.remote.is_some()
    }

    pub fn full_sync_after(&self) -> Option<Duration> {
        match self.sync.full_sync_after_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Directory holding persisted state: `PILLAR_STATE_DIR`, else the
/// platform state directory, else the local data directory.
pub fn state_dir() -> Result<PathBuf> {
    if let Some(dir) = env::state_dir() {
        return Ok(dir);
    }
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .map(|base| base.join(STATE_DIR_NAME))
        .ok_or_else(|| Error::Config("could not determine a state directory".to_string()))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
