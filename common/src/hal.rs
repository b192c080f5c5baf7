//! Trait seams between the portable monitor logic and the platform.
//!
//! The esp32 target implements these over `esp-idf-hal`/`esp-idf-svc`; the
//! host target implements them over `std::net` and simulated devices; tests
//! implement them with scripted mocks.

/// Result of an I2C write transaction, modelled on the classic Arduino
/// `endTransmission` status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusStatus {
    Ok,
    DataTooLong,
    AddrNack,
    DataNack,
    /// A line is being held low past protocol expectations; the only status
    /// that warrants a manual bus clear.
    BusStuck,
    Timeout,
}

impl BusStatus {
    pub fn is_ok(self) -> bool {
        self == BusStatus::Ok
    }

    pub fn code(self) -> u8 {
        match self {
            BusStatus::Ok => 0,
            BusStatus::DataTooLong => 1,
            BusStatus::AddrNack => 2,
            BusStatus::DataNack => 3,
            BusStatus::BusStuck => 4,
            BusStatus::Timeout => 5,
        }
    }
}

/// The shared I2C port. Transaction-level access for normal operation plus
/// raw open-drain line control, used only while unwedging a stuck bus.
///
/// Releasing a line means configuring it as a pulled-up input; driving it
/// low means sinking it as an output. Implementations must never drive a
/// line high.
pub trait I2cPort {
    fn write(&mut self, addr: u8, bytes: &[u8]) -> BusStatus;

    /// Reads up to `buf.len()` bytes, returning how many arrived. A short
    /// count is a fault the caller must handle.
    fn read_into(&mut self, addr: u8, buf: &mut [u8]) -> usize;

    fn release_scl(&mut self);
    fn release_sda(&mut self);
    fn drive_scl_low(&mut self);
    fn drive_sda_low(&mut self);
    fn scl_is_low(&mut self) -> bool;
    fn sda_is_low(&mut self) -> bool;

    /// Re-initializes the bus controller after manual line manipulation.
    fn reinit(&mut self);
}

pub trait Delay {
    fn delay_us(&mut self, us: u32);
    fn delay_ms(&mut self, ms: u32);
}

/// The one-wire thermometer chain.
pub trait Thermometers {
    fn device_count(&mut self) -> usize;
    fn set_resolution(&mut self, index: usize, bits: u8) -> bool;
    /// Kicks off a conversion on every device at once.
    fn request_conversion(&mut self);
    /// Reads the converted value of one device in Celsius. Values below
    /// -120 are error sentinels, not temperatures.
    fn read_celsius(&mut self, index: usize) -> f32;
}

/// A byte-oriented network connection. Reads block up to the implementation's
/// timeout; `None` means timeout or end of stream. Dropping the connection
/// closes it.
pub trait Connection {
    fn read_byte(&mut self) -> Option<u8>;

    /// True when at least one byte is already buffered (no blocking).
    fn available(&mut self) -> bool;

    fn write_all(&mut self, bytes: &[u8]);
    fn flush(&mut self);

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut n = 0;
        while n < buf.len() {
            match self.read_byte() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }
}

/// Outbound connection factory. Connections are created, used, and torn
/// down within one call; they are never retained across ticks.
pub trait Connector {
    type Conn: Connection;

    fn connect(&mut self, host: &str, port: u16) -> Option<Self::Conn>;
}

/// Inbound connection source for the web interface. Polling never blocks
/// waiting for a client.
pub trait Listener {
    type Conn: Connection;

    fn poll_client(&mut self) -> Option<Self::Conn>;
}

/// Staged firmware image sink. `begin` reserves space, `write` streams the
/// image, `finalize` commits it; any stage may refuse, leaving the running
/// firmware untouched.
pub trait UpdateSink {
    fn begin(&mut self, len: usize) -> bool;
    /// Returns how many bytes were actually accepted.
    fn write(&mut self, chunk: &[u8]) -> usize;
    fn finalize(&mut self) -> bool;
}

/// Chip-level operations: identity, restarts, and factory reset plumbing.
pub trait System {
    fn chip_id(&self) -> u32;
    fn restart(&mut self);
    /// Erases persisted device configuration (wifi credentials etc.).
    fn erase_config(&mut self);
    /// Hard reset, used after a factory reset.
    fn reset(&mut self);
    /// Formats the flash filesystem. Returns false when formatting failed.
    fn format_storage(&mut self) -> bool;
}
