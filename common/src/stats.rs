//! Telemetry reporting: periodic JSON POSTs to the configured endpoint.

use chrono::{Local, TimeZone};
use log::{debug, warn};

use crate::config::MonitorConfig;
use crate::hal::{Connection, Connector};
use crate::http::USER_AGENT;
use crate::types::{SensorData, SensorReading};

/// Collects clean samples between reporting intervals and posts the best
/// available one when the interval elapses.
pub struct StatsReporter {
    device_id: u32,
    last_collected: SensorData,
    last_sent: i64,
}

impl StatsReporter {
    pub fn new(device_id: u32) -> Self {
        Self {
            device_id,
            last_collected: SensorData::seed(),
            last_sent: 0,
        }
    }

    /// Folds in the current tick's readings and posts when due. A sample is
    /// cached only when every configured sensor group read cleanly; when
    /// the interval elapses with nothing clean cached, the most recent
    /// (errored) readings are reported instead so gaps stay visible.
    pub fn post_stats(
        &mut self,
        readings: &SensorData,
        digital_1: u8,
        digital_2: u8,
        analog: u8,
        config: &MonitorConfig,
        net: &mut impl Connector,
    ) {
        if self.last_collected.timestamp < readings.timestamp
            && (!config.has_sht_sensor
                || !(readings.humidity.has_error || readings.air_temp.has_error))
            && (config.num_therm_sensors == 0
                || !(readings.high_temp.has_error || readings.low_temp.has_error))
        {
            self.last_collected = *readings;
            debug!("caching sensor data at {}", self.last_collected.timestamp);
        }

        if readings.timestamp - self.last_sent < i64::from(config.stats_interval)
            || !config.stats_url.set
        {
            return;
        }
        debug!("sending stats to {}", config.stats_url);

        let to_send = if self.last_collected.timestamp <= self.last_sent {
            // Nothing clean collected since the last post; report the most
            // recent readings, errors and all.
            debug!(
                "last cached value is stale ({} <= {}), reporting most recent",
                self.last_collected.timestamp, self.last_sent
            );
            *readings
        } else {
            self.last_collected
        };

        let body = self.render_json(&to_send, digital_1, digital_2, analog);
        let Some(mut conn) = net.connect(&config.stats_url.host, config.stats_url.port) else {
            warn!("unable to connect to {}", config.stats_url);
            return;
        };
        let request = format!(
            "POST {} HTTP/1.0\r\n\
             Host: {}:{}\r\n\
             User-Agent: {}\r\n\
             Connection: close\r\n\
             Content-type: application/json\r\n\
             Content-Length: {}\r\n\r\n",
            config.stats_url.path,
            config.stats_url.host,
            config.stats_url.port,
            USER_AGENT,
            body.len(),
        );
        conn.write_all(request.as_bytes());
        conn.write_all(body.as_bytes());
        conn.flush();
        self.last_sent = to_send.timestamp;
    }

    fn render_json(&self, sample: &SensorData, digital_1: u8, digital_2: u8, analog: u8) -> String {
        let when = Local
            .timestamp_opt(sample.timestamp, 0)
            .earliest()
            .map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string())
            .unwrap_or_default();
        format!(
            "{{\"id\":{},\"timestamp\":\"{}\",\"high_temp\":{},\"low_temp\":{},\
             \"air_temp\":{},\"humidity\":{},\"digital_1\":{},\"digital_2\":{},\"analog\":{}}}",
            self.device_id,
            when,
            json_number(sample.high_temp),
            json_number(sample.low_temp),
            json_number(sample.air_temp),
            json_number(sample.humidity),
            digital_1,
            digital_2,
            analog,
        )
    }
}

/// Errored readings serialize as JSON null rather than a bogus number.
fn json_number(reading: SensorReading) -> String {
    if reading.has_error {
        "null".to_owned()
    } else {
        format!("{:.2}", reading.value)
    }
}
