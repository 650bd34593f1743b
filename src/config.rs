use crate::network::ServerConfig;
use crate::transport::{DuplexConfig, LongPollConfig};
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Session timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Interval between server pings; 0 disables heartbeats
    pub heartbeat_interval_ms: u64,
    /// How long to wait for a pong before timing the session out
    pub timeout_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 15_000,
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LongPollSettings {
    /// Outbound buffer capacity per session, in bytes
    pub buffer_size: usize,
    /// How long a send may wait for buffer space
    pub max_idle_ms: u64,
    /// How long an idle GET is held open
    pub poll_timeout_ms: u64,
}

impl Default for LongPollSettings {
    fn default() -> Self {
        Self {
            buffer_size: 1024 * 1024,
            max_idle_ms: 1_000,
            poll_timeout_ms: 20_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketSettings {
    pub bind_addr: String,
    pub handshake_timeout_ms: u64,
    pub max_message_size: usize,
    pub max_connections: usize,
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            handshake_timeout_ms: 10_000,
            max_message_size: 1024 * 1024,
            max_connections: 1000,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionSettings,
    pub long_poll: LongPollSettings,
    pub socket: SocketSettings,
    /// Default tracing filter when RUST_LOG is unset
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session: SessionSettings::default(),
            long_poll: LongPollSettings::default(),
            socket: SocketSettings::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Get the default config directory
    pub fn default_config_dir() -> Result<PathBuf> {
        ProjectDirs::from("dev", "polysock", "polysock")
            .map(|proj_dirs| proj_dirs.config_dir().to_path_buf())
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))
    }

    /// Get the default config file path
    pub fn default_config_file() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("config.toml"))
    }

    /// Load configuration from the default file, creating it if it doesn't exist
    pub fn load_or_create_default() -> Result<Self> {
        let config_file = Self::default_config_file()?;

        if config_file.exists() {
            Self::load_from(&config_file)
        } else {
            let config = Config::default();
            config.save_to(&config_file)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse configuration file: {}", path.display()))
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure config directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write configuration file: {}", path.display()))?;
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.session.heartbeat_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.session.timeout_ms)
    }

    pub fn long_poll_config(&self) -> LongPollConfig {
        LongPollConfig {
            buffer_size: self.long_poll.buffer_size,
            max_idle: Duration::from_millis(self.long_poll.max_idle_ms),
            poll_timeout: Duration::from_millis(self.long_poll.poll_timeout_ms),
            heartbeat_interval: self.heartbeat_interval(),
            timeout: self.timeout(),
        }
    }

    pub fn duplex_config(&self) -> DuplexConfig {
        DuplexConfig {
            heartbeat_interval: self.heartbeat_interval(),
            timeout: self.timeout(),
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.socket.bind_addr.clone(),
            handshake_timeout: Duration::from_millis(self.socket.handshake_timeout_ms),
            max_message_size: self.socket.max_message_size,
            max_connections: self.socket.max_connections,
            duplex: self.duplex_config(),
        }
    }
}
