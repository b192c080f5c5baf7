//! Discrete PID control law producing an actuator duty byte.

use crate::types::SensorReading;

/// Readings further apart than this have their time delta clamped to one
/// second, so a stalled tick cannot dump a huge interval into the
/// integral or flatten the derivative.
const MAX_SAMPLE_GAP: i64 = 600;

/// PID loop over timestamped sensor readings. The output is centered at
/// 127, so a zero control signal maps to the midpoint of the actuator's
/// analog range.
pub struct PidController {
    target: f64,
    kp: f64,
    ki: f64,
    kd: f64,
    /// Per-sample decay applied to the integral term, to bleed off
    /// accumulated error when the plant cannot respond.
    dropoff: f64,
    prev_error: f64,
    integral: f64,
    last_sampled: Option<i64>,
}

impl PidController {
    pub fn new(target: f64, kp: f64, ki: f64, kd: f64, dropoff: f64) -> Self {
        Self {
            target,
            kp,
            ki,
            kd,
            dropoff,
            prev_error: 0.0,
            integral: 0.0,
            last_sampled: None,
        }
    }

    pub fn set_target(&mut self, target: f64) {
        self.target = target;
    }

    /// Folds one reading into the loop and returns the duty byte. Errored
    /// readings hold the previous error with a zero derivative, so the
    /// output decays via the integral dropoff instead of jumping.
    pub fn add_reading(&mut self, reading: SensorReading, timestamp: i64) -> u8 {
        let mut dt = match self.last_sampled {
            Some(last) => timestamp - last,
            None => 1,
        };
        if dt > MAX_SAMPLE_GAP {
            dt = 1;
        }

        let (error, derivative) = if reading.has_error || dt == 0 {
            (self.prev_error, 0.0)
        } else {
            let error = self.target - f64::from(reading.value);
            let derivative = (error - self.prev_error) / dt as f64;
            self.integral = self.integral * self.dropoff + error * dt as f64;
            self.prev_error = error;
            self.last_sampled = Some(timestamp);
            (error, derivative)
        };

        let signal = self.kp * error + self.ki * self.integral + self.kd * derivative;
        (127.0 + signal.clamp(-127.0, 128.0)) as u8
    }
}
