//! Daemon configuration.

use std::path::PathBuf;
use std::time::Duration;
use texsync_core::protocol::MAX_MESSAGE_SIZE;

pub const DEFAULT_ROOT: &str = "./fs";
pub const DEFAULT_LISTEN: &str = "0.0.0.0:6000";
pub const DEFAULT_BATCH_INTERVAL_MS: u64 = 2500;

/// Runtime settings, built from CLI arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Storage root every filename is confined to
    pub root: PathBuf,
    /// Address to accept WebSocket connections on
    pub listen: String,
    /// Time between batch ticks
    pub batch_interval: Duration,
    /// Largest inbound frame accepted, in bytes
    pub max_message_size: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            listen: DEFAULT_LISTEN.to_string(),
            batch_interval: Duration::from_millis(DEFAULT_BATCH_INTERVAL_MS),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl DaemonConfig {
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.root.as_os_str().is_empty() {
            return Err(ConfigError::EmptyRoot);
        }
        if self.listen.trim().is_empty() {
            return Err(ConfigError::EmptyListen);
        }
        if self.batch_interval.is_zero() {
            return Err(ConfigError::ZeroBatchInterval);
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::ZeroMessageSize);
        }
        Ok(self)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Storage root must not be empty")]
    EmptyRoot,

    #[error("Listen address must not be empty")]
    EmptyListen,

    #[error("Batch interval must be greater than zero")]
    ZeroBatchInterval,

    #[error("Max message size must be greater than zero")]
    ZeroMessageSize,
}
