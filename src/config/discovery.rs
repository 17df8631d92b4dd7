use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_DISCOVERY_PREFIX;
use crate::Error;
use crate::Result;

/// Where registrations live in the keyspace and how their payloads are treated
///
/// ```toml
/// [discovery]
/// prefix = "/srvdis/"
/// namespace = "game-eu1"
/// strict_payloads = false
/// ```
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DiscoveryConfig {
    /// Key prefix of registration records, must start and end with `/`
    ///
    /// Default: `/srvdis/`
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Deployment-wide namespace prepended to every key (empty = none)
    ///
    /// With namespace `game-eu1` the record for `gate/1` is stored at
    /// `game-eu1/srvdis/gate/1`.
    #[serde(default)]
    pub namespace: String,

    /// Abort the watch when a registration payload fails to decode
    ///
    /// - `false` (default): drop the offending record, log it and continue
    /// - `true`: treat the payload as data corruption and fault the reflector
    #[serde(default)]
    pub strict_payloads: bool,
}

fn default_prefix() -> String {
    DEFAULT_DISCOVERY_PREFIX.to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            namespace: String::new(),
            strict_payloads: false,
        }
    }
}

impl DiscoveryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.prefix.len() < 3 || !self.prefix.starts_with('/') || !self.prefix.ends_with('/') {
            return Err(Error::Config(ConfigError::Message(format!(
                "discovery prefix must look like \"/name/\", got {:?}",
                self.prefix
            ))));
        }

        if self.prefix[1..self.prefix.len() - 1].contains('/') {
            return Err(Error::Config(ConfigError::Message(format!(
                "discovery prefix must be a single path segment, got {:?}",
                self.prefix
            ))));
        }

        if self.namespace.ends_with('/') {
            return Err(Error::Config(ConfigError::Message(format!(
                "discovery namespace must not end with '/', got {:?}",
                self.namespace
            ))));
        }

        Ok(())
    }
}
