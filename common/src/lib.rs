pub mod config;
pub mod hal;
pub mod http;
pub mod monitor;
pub mod ota;
pub mod outputs;
pub mod pid;
pub mod recovery;
pub mod sensors;
pub mod stats;
pub mod types;
pub mod web;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ConfigError, MonitorConfig, Url};
pub use monitor::VivariumMonitor;
pub use pid::PidController;
pub use types::{OutputState, SensorData, SensorReading};

/// Version string reported to the update server (`X-FWVER`) and on the
/// status page.
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");
