//! Host build: the full control loop against simulated hardware, for
//! development without a flashed device.

use std::fs::File;
use std::io::Write;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use vivarium_common::hal::{BusStatus, Delay, I2cPort, System, Thermometers, UpdateSink};
use vivarium_common::sensors::{sht_crc8, SHT40_ADDRESS, SHT40_READ_CMD};
use vivarium_common::{MonitorConfig, Url, VivariumMonitor};

use crate::tcp::{TcpNet, TcpServer};

const WEB_PORT: u16 = 8080;
const STAGING_PATH: &str = "staged-firmware.bin";

#[derive(Debug, Default, Serialize, Deserialize)]
struct HostConfig {
    #[serde(default)]
    monitor: MonitorConfig,
    #[serde(default)]
    update_url: Url,
}

fn load_config() -> anyhow::Result<HostConfig> {
    match std::env::var("VIVARIUM_CONFIG") {
        Ok(path) => {
            let file = File::open(&path).with_context(|| format!("opening config {path}"))?;
            serde_json::from_reader(file).with_context(|| format!("parsing config {path}"))
        }
        Err(_) => {
            info!("VIVARIUM_CONFIG not set, using default configuration");
            Ok(HostConfig::default())
        }
    }
}

/// Fake I2C bus carrying a well-behaved hygrometer at the usual address.
/// Humidity and temperature drift on slow sine-ish waves so the PID loop
/// has something to chase.
#[derive(Default)]
struct SimPort {
    reads: u32,
    pending_read: bool,
}

impl SimPort {
    fn current_frame(&self) -> [u8; 6] {
        let phase = f32::sin(self.reads as f32 / 20.0);
        let temp = 22.0 + 3.0 * phase;
        let humidity = 75.0 + 10.0 * phase;
        let t_ticks = ((temp + 45.0) / 175.0 * 65535.0) as u16;
        let rh_ticks = ((humidity + 6.0) / 125.0 * 65535.0) as u16;
        let t = t_ticks.to_be_bytes();
        let rh = rh_ticks.to_be_bytes();
        [t[0], t[1], sht_crc8(t_ticks), rh[0], rh[1], sht_crc8(rh_ticks)]
    }
}

impl I2cPort for SimPort {
    fn write(&mut self, addr: u8, bytes: &[u8]) -> BusStatus {
        if addr == SHT40_ADDRESS {
            self.pending_read = bytes == [SHT40_READ_CMD];
            BusStatus::Ok
        } else {
            // Actuator board: accept anything.
            BusStatus::Ok
        }
    }

    fn read_into(&mut self, addr: u8, buf: &mut [u8]) -> usize {
        if addr != SHT40_ADDRESS || !self.pending_read || buf.len() < 6 {
            return 0;
        }
        self.pending_read = false;
        self.reads += 1;
        buf[..6].copy_from_slice(&self.current_frame());
        6
    }

    fn release_scl(&mut self) {}
    fn release_sda(&mut self) {}
    fn drive_scl_low(&mut self) {}
    fn drive_sda_low(&mut self) {}

    fn scl_is_low(&mut self) -> bool {
        false
    }

    fn sda_is_low(&mut self) -> bool {
        false
    }

    fn reinit(&mut self) {}
}

struct SimTherms {
    count: usize,
    reads: u32,
}

impl Thermometers for SimTherms {
    fn device_count(&mut self) -> usize {
        self.count
    }

    fn set_resolution(&mut self, _index: usize, _bits: u8) -> bool {
        true
    }

    fn request_conversion(&mut self) {
        self.reads += 1;
    }

    fn read_celsius(&mut self, index: usize) -> f32 {
        22.0 + index as f32 + 2.0 * f32::sin(self.reads as f32 / 30.0)
    }
}

struct SleepDelay;

impl Delay for SleepDelay {
    fn delay_us(&mut self, us: u32) {
        thread::sleep(Duration::from_micros(u64::from(us)));
    }

    fn delay_ms(&mut self, ms: u32) {
        thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}

/// Stages firmware images into a local file instead of a flash partition.
#[derive(Default)]
struct FileSink {
    file: Option<File>,
    expected: usize,
    written: usize,
}

impl UpdateSink for FileSink {
    fn begin(&mut self, len: usize) -> bool {
        match File::create(STAGING_PATH) {
            Ok(file) => {
                self.file = Some(file);
                self.expected = len;
                self.written = 0;
                true
            }
            Err(err) => {
                warn!("could not create {STAGING_PATH}: {err}");
                false
            }
        }
    }

    fn write(&mut self, chunk: &[u8]) -> usize {
        match self.file.as_mut().and_then(|f| f.write_all(chunk).ok()) {
            Some(()) => {
                self.written += chunk.len();
                chunk.len()
            }
            None => 0,
        }
    }

    fn finalize(&mut self) -> bool {
        self.file = None;
        let complete = self.written == self.expected;
        if complete {
            info!("firmware image staged to {STAGING_PATH}");
        }
        complete
    }
}

struct HostSystem;

impl System for HostSystem {
    fn chip_id(&self) -> u32 {
        std::process::id()
    }

    fn restart(&mut self) {
        info!("restart requested, exiting");
        std::process::exit(0);
    }

    fn erase_config(&mut self) {
        info!("erase_config requested (no-op on host)");
    }

    fn reset(&mut self) {
        info!("reset requested, exiting");
        std::process::exit(0);
    }

    fn format_storage(&mut self) -> bool {
        info!("format_storage requested (no-op on host)");
        true
    }
}

pub fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = load_config()?;
    let therm_count = config.monitor.num_therm_sensors;
    info!(
        "starting host simulation: sht={} therms={} stats={} update={}",
        config.monitor.has_sht_sensor,
        therm_count,
        config.monitor.stats_url,
        config.update_url,
    );

    let listener = TcpServer::bind(WEB_PORT).context("binding web interface")?;
    info!("web interface listening on port {WEB_PORT}");

    let mut monitor = VivariumMonitor::new(
        config.monitor,
        config.update_url,
        SimPort::default(),
        SimTherms {
            count: therm_count,
            reads: 0,
        },
        SleepDelay,
        TcpNet,
        listener,
        FileSink::default(),
        HostSystem,
    );
    crate::attach_handlers(&mut monitor);

    loop {
        monitor.tick(Utc::now().timestamp());
        thread::sleep(Duration::from_secs(1));
    }
}
