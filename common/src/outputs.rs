//! Outbound side of the control loop: the I2C actuator board.

use log::warn;

use crate::hal::{BusStatus, Delay, I2cPort};
use crate::recovery::reset_bus;
use crate::types::OutputState;

pub const ACTUATOR_ADDRESS: u8 = 42;

/// Transmissions attempted per state change before giving up. Matching
/// acknowledged and desired state is cheap, so a stuck peripheral does not
/// turn every tick into bus traffic.
const SEND_ATTEMPTS: u8 = 3;

/// Tracks desired actuator state and pushes it over the wire when it
/// changes. Each change gets a fresh attempt budget.
pub struct ActuatorWriter {
    state: OutputState,
}

impl ActuatorWriter {
    pub fn new() -> Self {
        Self {
            state: OutputState::default(),
        }
    }

    pub fn state(&self) -> OutputState {
        self.state
    }

    pub fn set_analog(&mut self, value: u8) {
        if self.state.analog != value {
            self.state.analog = value;
            self.state.attempts = SEND_ATTEMPTS;
        }
    }

    pub fn set_digital_one(&mut self, value: u8) {
        let value = u8::from(value != 0);
        if self.state.digital_1 != value {
            self.state.digital_1 = value;
            self.state.attempts = SEND_ATTEMPTS;
        }
    }

    pub fn set_digital_two(&mut self, value: u8) {
        let value = u8::from(value != 0);
        if self.state.digital_2 != value {
            self.state.digital_2 = value;
            self.state.attempts = SEND_ATTEMPTS;
        }
    }

    /// Sends the pending state, if any. A successful transmission consumes
    /// one attempt and silences further sends; failures keep the budget so
    /// the next tick retries until it runs out.
    pub fn write_outputs(&mut self, port: &mut impl I2cPort, delay: &mut impl Delay) {
        if self.state.attempts == 0 {
            return;
        }
        let payload = encode_actuator_frame(self.state.analog, self.state.digital_1, self.state.digital_2);
        let status = port.write(ACTUATOR_ADDRESS, &payload);
        if status.is_ok() {
            self.state.attempts = 0;
        } else {
            warn!("error sending output values: i2c bus error {}", status.code());
            if status == BusStatus::BusStuck {
                reset_bus(port, delay);
            }
            self.state.attempts -= 1;
        }
    }
}

impl Default for ActuatorWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Packs the two-byte actuator frame: the analog value, then the digital
/// bits in the low nibble with a checksum over all three fields above them.
pub fn encode_actuator_frame(analog: u8, digital_1: u8, digital_2: u8) -> [u8; 2] {
    let bits = digital_1 | (digital_2 << 1);
    let cksum = (analog & 0x0F) ^ (analog >> 4) ^ bits;
    [analog, (cksum << 4) | bits]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockDelay, MockPort, PinOp};
    use pretty_assertions::assert_eq;

    #[test]
    fn unchanged_state_stays_off_the_bus() {
        let mut writer = ActuatorWriter::new();
        let mut port = MockPort::new();
        let mut delay = MockDelay::default();

        writer.write_outputs(&mut port, &mut delay);
        writer.set_analog(0);
        writer.set_digital_one(0);
        writer.write_outputs(&mut port, &mut delay);

        assert!(port.writes.is_empty());
    }

    #[test]
    fn changed_state_sends_checksummed_frame() {
        let mut writer = ActuatorWriter::new();
        let mut port = MockPort::new();
        let mut delay = MockDelay::default();

        writer.set_analog(50);
        writer.set_digital_one(1);
        writer.set_digital_two(1);
        writer.write_outputs(&mut port, &mut delay);
        writer.write_outputs(&mut port, &mut delay);

        assert_eq!(port.writes, vec![(ACTUATOR_ADDRESS, vec![50, 35])]);
    }

    #[test]
    fn digital_inputs_are_normalized_to_bits() {
        let mut writer = ActuatorWriter::new();
        writer.set_digital_one(200);
        writer.set_digital_two(7);
        let s = writer.state();
        assert_eq!((s.digital_1, s.digital_2), (1, 1));
    }

    #[test]
    fn failures_retry_until_budget_runs_out() {
        let mut writer = ActuatorWriter::new();
        let mut port = MockPort::new();
        let mut delay = MockDelay::default();
        port.write_results =
            vec![BusStatus::AddrNack, BusStatus::AddrNack, BusStatus::AddrNack].into();

        writer.set_analog(10);
        for _ in 0..6 {
            writer.write_outputs(&mut port, &mut delay);
        }

        assert_eq!(port.writes.len(), 3);
        assert_eq!(writer.state().attempts, 0);
    }

    #[test]
    fn new_change_refreshes_the_budget() {
        let mut writer = ActuatorWriter::new();
        let mut port = MockPort::new();
        let mut delay = MockDelay::default();
        port.write_results = vec![BusStatus::AddrNack; 4].into();

        writer.set_analog(10);
        for _ in 0..3 {
            writer.write_outputs(&mut port, &mut delay);
        }
        writer.set_analog(20);
        writer.write_outputs(&mut port, &mut delay);
        writer.write_outputs(&mut port, &mut delay);

        // 3 failed sends of 10, one failed and one good send of 20.
        assert_eq!(port.writes.len(), 5);
        assert_eq!(port.writes[4].1[0], 20);
        assert_eq!(writer.state().attempts, 0);
    }

    #[test]
    fn stuck_bus_triggers_recovery() {
        let mut writer = ActuatorWriter::new();
        let mut port = MockPort::new();
        let mut delay = MockDelay::default();
        port.write_results.push_back(BusStatus::BusStuck);

        writer.set_digital_one(1);
        writer.write_outputs(&mut port, &mut delay);

        assert!(port.pin_ops.contains(&PinOp::ReleaseScl));
        assert_eq!(port.reinit_count, 1);
        assert_eq!(writer.state().attempts, SEND_ATTEMPTS - 1);
    }
}
