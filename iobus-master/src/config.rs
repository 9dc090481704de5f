//! Master configuration
//!
//! A small structured TOML file loaded once at startup and handed to
//! [`crate::bus_manager::BusManager`].

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use snafu::{ResultExt, Snafu};

/// Error returned when loading a [`MasterConfig`]
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// Failed to read the config file
    #[snafu(display("IO error loading {path}: {source}"))]
    Io {
        /// Path that failed to load
        path: String,
        /// Underlying IO error
        source: std::io::Error,
    },
    /// The file was not valid TOML
    #[snafu(display("Error parsing TOML: {source}"))]
    TomlDeserialization {
        /// Underlying parse error
        source: toml::de::Error,
    },
}

/// Configuration controlling a [`crate::bus_manager::BusManager`] instance
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MasterConfig {
    /// Name of the SocketCAN interface to bind, e.g. `can0`
    pub interface: String,
    /// Path to the discovery cache file
    #[serde(default = "default_cache_path")]
    pub discovery_cache_path: String,
    /// Interval between fast-scan probe frames, in milliseconds
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    /// Interval between liveness pings, in milliseconds
    #[serde(default = "default_liveness_interval_ms")]
    pub liveness_interval_ms: u64,
}

fn default_cache_path() -> String {
    "iobus-discovery-cache.json".to_string()
}

fn default_probe_interval_ms() -> u64 {
    1000
}

fn default_liveness_interval_ms() -> u64 {
    2000
}

impl MasterConfig {
    /// Load a configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).context(IoSnafu {
            path: path.to_string_lossy(),
        })?;
        Self::load_from_str(&content)
    }

    /// Load a configuration from a TOML string
    pub fn load_from_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).context(TomlDeserializationSnafu)
    }

    /// The fast-scan probe interval as a [`Duration`]
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    /// The liveness ping interval as a [`Duration`]
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let cfg = MasterConfig::load_from_str(r#"interface = "can0""#).unwrap();
        assert_eq!(cfg.interface, "can0");
        assert_eq!(cfg.probe_interval_ms, 1000);
        assert_eq!(cfg.liveness_interval_ms, 2000);
    }

    #[test]
    fn rejects_unknown_fields() {
        let result = MasterConfig::load_from_str(
            r#"
            interface = "can0"
            bogus_field = 1
            "#,
        );
        assert!(result.is_err());
    }
}
