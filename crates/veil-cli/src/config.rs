//! Configuration file for the Veil CLI.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use veil_relay::ServerConfig;
use veil_relay::config::MAX_PACKET_SIZE_LIMIT;

/// Veil configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Listener and identity
    #[serde(default)]
    pub server: ServerSection,
    /// Relay tuning
    #[serde(default)]
    pub relay: RelaySection,
    /// Logging
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Listener and identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Private key file (hex-encoded seed)
    #[serde(default = "default_private_key_path")]
    pub private_key_file: PathBuf,
}

/// Relay tuning, timeouts in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySection {
    /// Per-write timeout before a client is dropped
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Handshake deadline
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Idle time before a keep-alive is sent
    #[serde(default = "default_keep_alive_ms")]
    pub keep_alive_ms: u64,
    /// Outbound queue capacity per session, in packets
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Largest relayed payload in bytes
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
    /// Interval between stats log lines, 0 disables them
    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_listen_addr() -> String {
    "0.0.0.0:3340".to_string()
}

fn default_private_key_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("veil/private_key")
}

fn default_write_timeout_ms() -> u64 {
    2_000
}

fn default_handshake_timeout_ms() -> u64 {
    5_000
}

fn default_keep_alive_ms() -> u64 {
    60_000
}

fn default_queue_capacity() -> usize {
    32
}

fn default_max_packet_size() -> usize {
    veil_relay::MAX_PACKET_SIZE
}

fn default_stats_interval_ms() -> u64 {
    60_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            private_key_file: default_private_key_path(),
        }
    }
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            write_timeout_ms: default_write_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            keep_alive_ms: default_keep_alive_ms(),
            queue_capacity: default_queue_capacity(),
            max_packet_size: default_max_packet_size(),
            stats_interval_ms: default_stats_interval_ms(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("veil/config.toml")
    }

    /// Load `path` if it exists, defaults otherwise
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse listen address as `SocketAddr`
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn parse_listen_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.server.listen_addr.parse()?)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.parse_listen_addr()?;

        let relay = &self.relay;
        if relay.write_timeout_ms == 0 {
            anyhow::bail!("write_timeout_ms must be greater than 0");
        }
        if relay.handshake_timeout_ms == 0 {
            anyhow::bail!("handshake_timeout_ms must be greater than 0");
        }
        if relay.keep_alive_ms == 0 {
            anyhow::bail!("keep_alive_ms must be greater than 0");
        }
        if relay.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be at least 1");
        }
        if relay.max_packet_size == 0 || relay.max_packet_size > MAX_PACKET_SIZE_LIMIT {
            anyhow::bail!("max_packet_size must be between 1 and {MAX_PACKET_SIZE_LIMIT}");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Relay settings as a library configuration
    #[must_use]
    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig {
            write_timeout: Duration::from_millis(self.relay.write_timeout_ms),
            queue_capacity: self.relay.queue_capacity,
            handshake_timeout: Duration::from_millis(self.relay.handshake_timeout_ms),
            keep_alive_interval: Duration::from_millis(self.relay.keep_alive_ms),
            max_packet_size: self.relay.max_packet_size,
        }
    }

    /// Stats logging interval, `None` when disabled
    #[must_use]
    pub fn stats_interval(&self) -> Option<Duration> {
        (self.relay.stats_interval_ms > 0)
            .then(|| Duration::from_millis(self.relay.stats_interval_ms))
    }
}
