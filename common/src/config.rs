use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of a URL host or path component, matching the fixed-size
/// fields of the persisted configuration blob.
pub const CONFIG_STR_LEN: usize = 126;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("url host exceeds {CONFIG_STR_LEN} bytes")]
    HostTooLong,
    #[error("url path exceeds {CONFIG_STR_LEN} bytes")]
    PathTooLong,
}

/// An endpoint loaded from persisted configuration. An unset URL disables
/// whichever feature consumes it (update polling, stats posting).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Url {
    pub host: String,
    pub path: String,
    pub port: u16,
    pub set: bool,
}

impl Url {
    pub fn new(host: &str, path: &str, port: u16) -> Result<Self, ConfigError> {
        if host.len() > CONFIG_STR_LEN {
            return Err(ConfigError::HostTooLong);
        }
        if path.len() > CONFIG_STR_LEN {
            return Err(ConfigError::PathTooLong);
        }
        Ok(Self {
            host: host.to_string(),
            path: path.to_string(),
            port,
            set: true,
        })
    }

    /// A URL that disables its consumer.
    pub fn unset() -> Self {
        Self::default()
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http://{}:{}{}", self.host, self.port, self.path)
    }
}

/// Monitor-wide configuration, loaded once at startup and read-only for the
/// rest of the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub has_sht_sensor: bool,
    pub num_therm_sensors: usize,
    /// Minimum seconds between physical sensor samples.
    pub sample_interval: u32,
    pub stats_url: Url,
    /// Minimum seconds between telemetry posts.
    pub stats_interval: u32,
    pub ntp_zone: String,
    pub ntp_server: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            has_sht_sensor: true,
            num_therm_sensors: 0,
            sample_interval: 60,
            stats_url: Url::unset(),
            stats_interval: 300,
            ntp_zone: "UTC0".to_string(),
            ntp_server: "pool.ntp.org".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn url_display_includes_all_parts() {
        let url = Url::new("example.org", "/fw", 8000).unwrap();
        assert_eq!(url.to_string(), "http://example.org:8000/fw");
        assert!(url.set);
    }

    #[test]
    fn unset_url_disables_consumer() {
        assert!(!Url::unset().set);
    }

    #[test]
    fn url_rejects_oversized_fields() {
        let long = "x".repeat(CONFIG_STR_LEN + 1);
        assert_eq!(
            Url::new(&long, "/", 80).unwrap_err(),
            ConfigError::HostTooLong
        );
        assert_eq!(
            Url::new("h", &long, 80).unwrap_err(),
            ConfigError::PathTooLong
        );
    }
}
