#[cfg(feature = "esp32")]
mod esp;
#[cfg(not(feature = "esp32"))]
mod host;
mod tcp;

use vivarium_common::hal::{Connector, Delay, I2cPort, Listener, System, Thermometers, UpdateSink};
use vivarium_common::{PidController, VivariumMonitor};

/// Humidity setpoint for the misting pump, percent RH.
const HUMIDITY_TARGET: f64 = 80.0;
/// Heat lamp engages below this floor temperature.
const HEAT_LAMP_ON_BELOW: f32 = 24.0;
/// Vivarium lights run from 08:00 to 20:00 local time.
const LIGHTS_ON_HOUR: u32 = 8;
const LIGHTS_OFF_HOUR: u32 = 20;

/// Wires the control policy onto the monitor: PID-driven misting on the
/// analog channel, a thermostatic heat lamp on digital 1 and a clock-driven
/// light on digital 2.
fn attach_handlers<P, T, D, N, L, U, S>(monitor: &mut VivariumMonitor<P, T, D, N, L, U, S>)
where
    P: I2cPort,
    T: Thermometers,
    D: Delay,
    N: Connector,
    L: Listener,
    U: UpdateSink,
    S: System,
{
    let mut pid = PidController::new(HUMIDITY_TARGET, 2.0, 0.05, 1.0, 0.95);
    monitor.set_analog_handler(Box::new(move |readings, now| {
        pid.add_reading(readings.humidity, now)
    }));

    monitor.set_digital_one_handler(Box::new(|readings, _| {
        if readings.low_temp.has_error {
            0
        } else {
            u8::from(readings.low_temp.value < HEAT_LAMP_ON_BELOW)
        }
    }));

    monitor.set_digital_two_handler(Box::new(|_, now| {
        use chrono::{Local, TimeZone, Timelike};
        let hour = Local
            .timestamp_opt(now, 0)
            .earliest()
            .map(|t| t.hour())
            .unwrap_or(0);
        u8::from((LIGHTS_ON_HOUR..LIGHTS_OFF_HOUR).contains(&hour))
    }));
}

#[cfg(not(feature = "esp32"))]
fn main() -> anyhow::Result<()> {
    host::run()
}

#[cfg(feature = "esp32")]
fn main() -> anyhow::Result<()> {
    esp::run()
}
