//! Manual I2C bus clear, for when a slave wedges the bus mid-transaction.
//!
//! Bit-level protocol adapted from the well-known I2C bus-clear sequence
//! published by Matthew Ford (forward.com.au), released into the public
//! domain.

use log::{info, warn};

use crate::hal::{Delay, I2cPort};

const CLOCK_PULSES: u32 = 20;
const STRETCH_POLLS: u32 = 20;
const STRETCH_POLL_MS: u32 = 100;

/// Attempts to unstick the bus by pumping SCL until the slave releases SDA,
/// then emitting a manufactured START/STOP. Best-effort: every failure path
/// logs and returns, leaving the lines pulled up.
pub fn reset_bus(port: &mut impl I2cPort, delay: &mut impl Delay) {
    info!("resetting i2c bus");

    port.release_sda();
    port.release_scl();

    if port.scl_is_low() {
        warn!("i2c bus clear failed: clock line held low");
        return;
    }

    let mut pulses = CLOCK_PULSES;
    while port.sda_is_low() && pulses > 0 {
        pulses -= 1;
        // Open collector bus: only ever sink the line or release it.
        port.drive_scl_low();
        delay.delay_us(10);
        port.release_scl();
        delay.delay_us(10);

        // The slave may stretch the clock; give it up to 2 seconds.
        let mut polls = STRETCH_POLLS;
        while port.scl_is_low() && polls > 0 {
            polls -= 1;
            delay.delay_ms(STRETCH_POLL_MS);
        }
        if port.scl_is_low() {
            warn!("i2c bus clear failed: slave clock stretch exceeded 2s");
            return;
        }
    }

    if port.sda_is_low() {
        warn!("i2c bus clear failed: data line held low");
        return;
    }

    // With a single master a START (or repeated START) followed by a STOP
    // clears the bus.
    port.drive_sda_low();
    delay.delay_us(10);
    port.release_sda();
    delay.delay_us(10);

    port.release_sda();
    port.release_scl();
    port.reinit();
}
