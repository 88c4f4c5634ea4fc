//! Scheduler and manager configuration.

use core::time::Duration;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde_derive::{Deserialize, Serialize};

use taskmesh_types::endpoint::EndpointId;

use crate::error::Error;

pub mod default {
    use super::Duration;

    pub fn load_query_timeout() -> Duration {
        Duration::from_secs(30)
    }

    pub fn refresh_timeout() -> Duration {
        Duration::from_secs(3)
    }

    pub fn show_queue_timeout() -> Duration {
        Duration::from_secs(3)
    }

    pub fn local_grace_period() -> Duration {
        Duration::from_secs(3)
    }

    pub fn poll_interval() -> Duration {
        Duration::from_millis(200)
    }

    pub fn max_outstanding() -> usize {
        1
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Remote worker endpoints, as `host` or `host:port` entries. The local
    /// server is never listed here; it is reached on demand.
    #[serde(default)]
    pub endpoints: Vec<EndpointId>,

    /// Per-endpoint deadline for the load queries made during placement.
    #[serde(
        default = "default::load_query_timeout",
        with = "humantime_serde"
    )]
    pub load_query_timeout: Duration,

    /// Deadline for a single handle refresh while polling.
    #[serde(default = "default::refresh_timeout", with = "humantime_serde")]
    pub refresh_timeout: Duration,

    /// Deadline for queue dumps; breaching it is non-fatal.
    #[serde(
        default = "default::show_queue_timeout",
        with = "humantime_serde"
    )]
    pub show_queue_timeout: Duration,

    /// How long to wait for the local server to come up or wind down.
    #[serde(
        default = "default::local_grace_period",
        with = "humantime_serde"
    )]
    pub local_grace_period: Duration,

    /// Pause between polling sweeps over outstanding handles.
    #[serde(default = "default::poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// How many dispatched tasks may be in flight at once.
    #[serde(default = "default::max_outstanding")]
    pub max_outstanding: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            load_query_timeout: default::load_query_timeout(),
            refresh_timeout: default::refresh_timeout(),
            show_queue_timeout: default::show_queue_timeout(),
            local_grace_period: default::local_grace_period(),
            poll_interval: default::poll_interval(),
            max_outstanding: default::max_outstanding(),
        }
    }
}

/// Attempt to load and parse the TOML config file at the given path.
pub fn load(path: impl AsRef<Path>) -> Result<Config, Error> {
    let config_toml = fs::read_to_string(&path).map_err(Error::config_io)?;
    toml::from_str(&config_toml).map_err(Error::config_decode)
}

/// Serialize the given `Config` as TOML to the given writer.
pub fn store_writer(config: &Config, mut writer: impl Write) -> Result<(), Error> {
    let toml_config = toml::to_string_pretty(config).map_err(Error::config_encode)?;

    writeln!(writer, "{toml_config}").map_err(Error::config_io)
}

#[cfg(test)]
mod tests {
    use super::{load, store_writer, Config};
    use test_log::test;

    #[test]
    fn parse_valid_config() {
        let path = concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/config/fixtures/taskmesh_conf_example.toml"
        );

        let config = load(path).expect("could not parse config");

        assert_eq!(config.endpoints.len(), 3);
    }

    #[test]
    fn serialize_valid_config() {
        let path = concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/config/fixtures/taskmesh_conf_example.toml"
        );

        let config = load(path).expect("could not parse config");

        let mut buffer = Vec::new();
        store_writer(&config, &mut buffer).unwrap();
    }

    #[test]
    fn default_timeouts() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config.load_query_timeout.as_secs(), 30);
        assert_eq!(config.refresh_timeout.as_secs(), 3);
        assert_eq!(config.show_queue_timeout.as_secs(), 3);
        assert_eq!(config.max_outstanding, 1);
        assert!(config.endpoints.is_empty());
    }

    #[test]
    fn reject_unknown_fields() {
        let config = toml::from_str::<Config>("socket_timeout = '30s'");

        assert!(config.is_err());
    }
}
