//! Session configuration

use crate::error::ConfigError;
use obd_link::DEFAULT_RETRY_INTERVAL;
use obd_protocol::ObdProtocol;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Timing and adapter settings for one diagnostic session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Wait between failed channel/connect attempts (milliseconds)
    pub retry_interval_ms: u64,

    /// Attempts per connect phase before giving up; unbounded when unset
    pub max_attempts: Option<u32>,

    /// Deadline for each initialisation command (milliseconds)
    pub init_timeout_ms: u64,

    /// Deadline for each sensor query (milliseconds)
    pub command_timeout_ms: u64,

    /// Adapter-side response timeout sent with `ATST`, in 4 ms units
    pub adapter_timeout: u8,

    /// Vehicle bus protocol selected during initialisation
    pub protocol: ObdProtocol,

    /// Pause between poll rounds (milliseconds)
    pub poll_interval_ms: u64,

    /// Stop after the first poll round
    pub single_round: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: DEFAULT_RETRY_INTERVAL.as_millis() as u64,
            max_attempts: None,
            init_timeout_ms: 5000,
            command_timeout_ms: 2000,
            adapter_timeout: 10,
            protocol: ObdProtocol::Auto,
            poll_interval_ms: 1000,
            single_round: false,
        }
    }
}

impl SessionConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Load configuration from an optional file layered under environment
/// variables named `<prefix>_<FIELD>` (nested fields joined by `__`).
pub fn load_config<T: DeserializeOwned>(path: Option<&Path>, prefix: &str) -> Result<T, ConfigError> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path));
    }
    builder = builder.add_source(
        config::Environment::with_prefix(prefix)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    Ok(builder.build()?.try_deserialize()?)
}
