//! Sensor ownership and decoding: the SHT40 hygrometer on I2C and the
//! DS18B20 thermometer chain on one-wire.

use log::{debug, warn};

use crate::config::MonitorConfig;
use crate::hal::{BusStatus, Delay, I2cPort, Thermometers};
use crate::recovery::reset_bus;
use crate::types::{SensorData, SensorReading};

pub const SHT40_ADDRESS: u8 = 0x44;
pub const SHT40_READ_CMD: u8 = 0xFD;
pub const SHT40_HEATER_CMD: u8 = 0x2F;

/// Seconds between activations of the SHT40's internal heater, which burns
/// condensation off the sensing element.
const HEAT_INTERVAL: i64 = 300;
/// Seconds of cool-down after a heater activation during which cached
/// values are served instead of touching the device.
const HEATER_COOLDOWN: i64 = 15;
/// Milliseconds to wait for an SHT40 conversion.
const SHT_CONVERSION_MS: u32 = 300;

/// Milliseconds to wait for a DS18B20 conversion at 9-bit resolution.
const THERM_CONVERSION_MS: u32 = 300;
pub const THERM_RESOLUTION_BITS: u8 = 9;
/// One-wire values below this are device error sentinels.
const THERM_ERROR_SENTINEL: f32 = -120.0;

/// Owns the cached sensor snapshot and the sampling schedule.
pub struct SensorHub {
    has_sht_sensor: bool,
    num_therm_sensors: usize,
    sample_interval: i64,
    reading: SensorData,
    last_heated: i64,
}

impl SensorHub {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            has_sht_sensor: config.has_sht_sensor,
            num_therm_sensors: config.num_therm_sensors,
            sample_interval: i64::from(config.sample_interval),
            reading: SensorData::seed(),
            last_heated: 0,
        }
    }

    /// Enumerates the thermometer chain and sets per-device resolution. A
    /// count mismatch is logged but not fatal; the mismatch will keep the
    /// high/low channels errored until it clears.
    pub fn init(&mut self, therms: &mut impl Thermometers) {
        let found = therms.device_count();
        if found != self.num_therm_sensors {
            warn!(
                "expected {} thermometer(s), found {}; continuing without them",
                self.num_therm_sensors, found
            );
        }
        for i in 0..found {
            if !therms.set_resolution(i, THERM_RESOLUTION_BITS) {
                warn!("failed to set resolution on thermometer {i}");
            }
        }
        debug!("found {found} thermometer(s)");
    }

    /// Samples both sources, honoring the sample interval: within it, the
    /// cached snapshot is returned with no bus traffic. The timestamp
    /// advances only when at least one source reports success.
    pub fn read_sensors(
        &mut self,
        now: i64,
        port: &mut impl I2cPort,
        therms: &mut impl Thermometers,
        delay: &mut impl Delay,
    ) -> SensorData {
        if now - self.reading.timestamp >= self.sample_interval {
            let mut updated = self.read_sht_sensor(now, port, delay);
            updated |= self.read_temp_sensors(therms, delay);
            if updated {
                self.reading.timestamp = now;
            }
        }
        self.reading
    }

    /// Reads the SHT40, activating the heater on schedule. Returns whether
    /// fresh values landed; heater turns and cool-down cache hits never
    /// advance the snapshot timestamp.
    fn read_sht_sensor(&mut self, now: i64, port: &mut impl I2cPort, delay: &mut impl Delay) -> bool {
        if !self.has_sht_sensor {
            self.reading.air_temp.has_error = true;
            self.reading.humidity.has_error = true;
            return false;
        }

        debug!("reading SHT40 sensor");
        let mut cmd = SHT40_READ_CMD;
        if now - self.last_heated >= HEAT_INTERVAL {
            self.last_heated = now;
            cmd = SHT40_HEATER_CMD;
            debug!("activating SHT40 heater");
        }

        // Give the element time to cool down after a heater turn.
        let use_cache = cmd != SHT40_HEATER_CMD && now - self.last_heated < HEATER_COOLDOWN;

        if !use_cache {
            let status = port.write(SHT40_ADDRESS, &[cmd]);
            if !status.is_ok() {
                warn!(
                    "error requesting data from SHT40: i2c bus error {}",
                    status.code()
                );
                if status == BusStatus::BusStuck {
                    reset_bus(port, delay);
                }
                self.reading.air_temp.has_error = true;
                self.reading.humidity.has_error = true;
                return false;
            }
        }

        if cmd == SHT40_HEATER_CMD || use_cache {
            debug!("using cached temperature/humidity values");
            return false;
        }

        delay.delay_ms(SHT_CONVERSION_MS);
        let mut frame = [0u8; 6];
        let len = port.read_into(SHT40_ADDRESS, &mut frame);
        if len != 6 {
            warn!("SHT40 returned {len} bytes, not 6");
            self.reading.air_temp.has_error = true;
            self.reading.humidity.has_error = true;
            return false;
        }

        let (air_temp, humidity) = decode_sht_frame(&frame);
        let mut has_good_value = false;
        if air_temp.has_error {
            warn!("SHT40 temperature checksum verification failed");
            self.reading.air_temp.has_error = true;
        } else {
            self.reading.air_temp = air_temp;
            has_good_value = true;
        }
        if humidity.has_error {
            warn!("SHT40 humidity checksum verification failed");
            self.reading.humidity.has_error = true;
        } else {
            self.reading.humidity = humidity;
            has_good_value = true;
        }
        has_good_value
    }

    /// Scans every discovered thermometer, tracking the coldest and hottest
    /// readings. One sentinel value invalidates the whole batch.
    fn read_temp_sensors(&mut self, therms: &mut impl Thermometers, delay: &mut impl Delay) -> bool {
        if self.num_therm_sensors == 0 {
            self.reading.high_temp.has_error = true;
            self.reading.low_temp.has_error = true;
            return false;
        }

        debug!("reading thermometers");
        therms.request_conversion();
        delay.delay_ms(THERM_CONVERSION_MS);

        self.reading.high_temp.value = -55.0;
        self.reading.low_temp.value = 125.0;
        self.reading.high_temp.has_error = true;
        self.reading.low_temp.has_error = true;

        let found = therms.device_count();
        for i in 0..found {
            let t = therms.read_celsius(i);
            if t < THERM_ERROR_SENTINEL {
                warn!("thermometer {i} returned error value {t:.0}");
                return false;
            }
            if t > self.reading.high_temp.value {
                self.reading.high_temp.value = t;
            }
            if t < self.reading.low_temp.value {
                self.reading.low_temp.value = t;
            }
        }

        if self.num_therm_sensors == found {
            self.reading.high_temp.has_error = false;
            self.reading.low_temp.has_error = false;
            true
        } else {
            false
        }
    }
}

/// Sensirion CRC-8: polynomial 0x31, initial value 0xFF, computed over the
/// 16-bit value MSB-first.
pub fn sht_crc8(value: u16) -> u8 {
    let mut crc: u8 = 0xFF;
    let mut value = value;
    for _ in 0..16 {
        if ((value & 0x8000) >> 8) as u8 == (crc & 0x80) {
            crc <<= 1;
        } else {
            crc = (crc << 1) ^ 0x31;
        }
        value <<= 1;
    }
    crc
}

/// Decodes a 6-byte SHT40 frame into (air_temp, humidity). Each channel is
/// validated independently: a bad temperature CRC does not discard the
/// humidity value, and vice versa.
pub fn decode_sht_frame(frame: &[u8; 6]) -> (SensorReading, SensorReading) {
    let t_ticks = u16::from_be_bytes([frame[0], frame[1]]);
    let air_temp = if sht_crc8(t_ticks) == frame[2] {
        SensorReading::ok(-45.0 + 175.0 * f32::from(t_ticks) / 65535.0)
    } else {
        SensorReading::errored()
    };

    let rh_ticks = u16::from_be_bytes([frame[3], frame[4]]);
    let humidity = if sht_crc8(rh_ticks) == frame[5] {
        SensorReading::ok((-6.0 + 125.0 * f32::from(rh_ticks) / 65535.0).clamp(0.0, 100.0))
    } else {
        SensorReading::errored()
    };

    (air_temp, humidity)
}
