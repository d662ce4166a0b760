//! Relay server configuration.

use crate::error::ConfigError;
use crate::frame::MAX_PACKET_SIZE;
use std::time::Duration;

/// Upper bound for `max_packet_size` (1 MiB)
pub const MAX_PACKET_SIZE_LIMIT: usize = 1 << 20;

/// Relay server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Longest a single write to a client may take before the session is dropped
    pub write_timeout: Duration,
    /// Capacity of each session's outbound queue, in packets
    pub queue_capacity: usize,
    /// Longest a connection may take to complete the handshake
    pub handshake_timeout: Duration,
    /// Idle time after which a keep-alive frame is written
    pub keep_alive_interval: Duration,
    /// Largest payload relayed
    pub max_packet_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(2),
            queue_capacity: 32,
            handshake_timeout: Duration::from_secs(5),
            keep_alive_interval: Duration::from_secs(60),
            max_packet_size: MAX_PACKET_SIZE,
        }
    }
}

impl ServerConfig {
    /// Check that every field is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.write_timeout.is_zero() {
            return Err(invalid("write_timeout", "must be greater than zero"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity", "must be at least 1"));
        }
        if self.handshake_timeout.is_zero() {
            return Err(invalid("handshake_timeout", "must be greater than zero"));
        }
        if self.keep_alive_interval.is_zero() {
            return Err(invalid("keep_alive_interval", "must be greater than zero"));
        }
        if self.max_packet_size == 0 || self.max_packet_size > MAX_PACKET_SIZE_LIMIT {
            return Err(invalid(
                "max_packet_size",
                format!("must be between 1 and {MAX_PACKET_SIZE_LIMIT}"),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}
