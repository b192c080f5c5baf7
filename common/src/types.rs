use serde::Serialize;

/// One sensor channel's latest sample. When `has_error` is set the value
/// must be ignored by every consumer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorReading {
    pub has_error: bool,
    pub value: f32,
}

impl SensorReading {
    pub fn errored() -> Self {
        Self {
            has_error: true,
            value: 0.0,
        }
    }

    pub fn ok(value: f32) -> Self {
        Self {
            has_error: false,
            value,
        }
    }
}

/// Snapshot of all sensor channels. The timestamp only advances when at
/// least one underlying source produced a non-error reading; callers
/// receiving the same timestamp twice are looking at the same sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorData {
    pub humidity: SensorReading,
    pub air_temp: SensorReading,
    pub high_temp: SensorReading,
    pub low_temp: SensorReading,
    pub timestamp: i64,
}

impl SensorData {
    /// The all-error seed used at startup, timestamp 0.
    pub fn seed() -> Self {
        Self {
            humidity: SensorReading::errored(),
            air_temp: SensorReading::errored(),
            high_temp: SensorReading::errored(),
            low_temp: SensorReading::errored(),
            timestamp: 0,
        }
    }
}

/// Desired actuator outputs plus the remaining physical-write budget.
/// `attempts` is non-zero only while the committed value still needs to be
/// pushed to the actuator board.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputState {
    pub analog: u8,
    pub digital_1: u8,
    pub digital_2: u8,
    pub attempts: u8,
}
