//! Watch protocol tuning
//!
//! ```toml
//! [watch]
//! snapshot_timeout_ms = 5000
//! event_buffer_size = 1024
//! history_limit = 10000
//! ```

use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct WatchConfig {
    /// Deadline for the bootstrap snapshot read in milliseconds
    ///
    /// Range: 1-600000
    /// Default: 5000
    #[serde(default = "default_snapshot_timeout_ms")]
    pub snapshot_timeout_ms: u64,

    /// Capacity of the live event channel of the in-memory store
    ///
    /// A watcher that falls further behind than this receives a lagged error
    /// and must resync.
    ///
    /// Default: 1024
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,

    /// Number of past events the in-memory store keeps for watch replay
    ///
    /// Watches starting before the oldest retained revision fail with a
    /// compaction error.
    ///
    /// Default: 10000
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_snapshot_timeout_ms() -> u64 {
    5000
}

fn default_event_buffer_size() -> usize {
    1024
}

fn default_history_limit() -> usize {
    10_000
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            snapshot_timeout_ms: default_snapshot_timeout_ms(),
            event_buffer_size: default_event_buffer_size(),
            history_limit: default_history_limit(),
        }
    }
}

impl WatchConfig {
    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=600_000).contains(&self.snapshot_timeout_ms) {
            return Err(Error::Config(ConfigError::Message(format!(
                "snapshot_timeout_ms must be between 1 and 600000, got {}",
                self.snapshot_timeout_ms
            ))));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "event_buffer_size must be greater than 0".to_string(),
            )));
        }

        if self.history_limit == 0 {
            return Err(Error::Config(ConfigError::Message(
                "history_limit must be greater than 0".to_string(),
            )));
        }

        Ok(())
    }
}
