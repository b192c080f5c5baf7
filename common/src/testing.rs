//! Scripted hardware doubles shared by the unit tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::hal::{
    BusStatus, Connection, Connector, Delay, I2cPort, Listener, System, Thermometers, UpdateSink,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinOp {
    ReleaseScl,
    ReleaseSda,
    DriveSclLow,
    DriveSdaLow,
}

/// I2C port double. Line-level reads consume the scripted `scl_low` /
/// `sda_low` vectors front to back; once exhausted the line reads as
/// released. Transaction writes pop `write_results` (default `Ok`) and
/// reads pop `read_frames`.
#[derive(Default)]
pub struct MockPort {
    pub writes: Vec<(u8, Vec<u8>)>,
    pub write_results: VecDeque<BusStatus>,
    pub read_frames: VecDeque<Vec<u8>>,
    pub pin_ops: Vec<PinOp>,
    pub scl_low: Vec<bool>,
    pub sda_low: Vec<bool>,
    pub reinit_count: usize,
}

impl MockPort {
    pub fn new() -> Self {
        Self::default()
    }
}

impl I2cPort for MockPort {
    fn write(&mut self, addr: u8, bytes: &[u8]) -> BusStatus {
        self.writes.push((addr, bytes.to_vec()));
        self.write_results.pop_front().unwrap_or(BusStatus::Ok)
    }

    fn read_into(&mut self, _addr: u8, buf: &mut [u8]) -> usize {
        match self.read_frames.pop_front() {
            Some(frame) => {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                n
            }
            None => 0,
        }
    }

    fn release_scl(&mut self) {
        self.pin_ops.push(PinOp::ReleaseScl);
    }

    fn release_sda(&mut self) {
        self.pin_ops.push(PinOp::ReleaseSda);
    }

    fn drive_scl_low(&mut self) {
        self.pin_ops.push(PinOp::DriveSclLow);
    }

    fn drive_sda_low(&mut self) {
        self.pin_ops.push(PinOp::DriveSdaLow);
    }

    fn scl_is_low(&mut self) -> bool {
        if self.scl_low.is_empty() {
            false
        } else {
            self.scl_low.remove(0)
        }
    }

    fn sda_is_low(&mut self) -> bool {
        if self.sda_low.is_empty() {
            false
        } else {
            self.sda_low.remove(0)
        }
    }

    fn reinit(&mut self) {
        self.reinit_count += 1;
    }
}

#[derive(Default)]
pub struct MockDelay {
    pub total_ms: u32,
    pub total_us: u32,
}

impl Delay for MockDelay {
    fn delay_us(&mut self, us: u32) {
        self.total_us += us;
    }

    fn delay_ms(&mut self, ms: u32) {
        self.total_ms += ms;
    }
}

/// One-wire chain double: one scripted temperature per device.
#[derive(Default)]
pub struct MockTherms {
    pub temps: Vec<f32>,
    pub conversions: usize,
    pub resolutions: Vec<(usize, u8)>,
}

impl MockTherms {
    pub fn with_temps(temps: Vec<f32>) -> Self {
        Self {
            temps,
            ..Self::default()
        }
    }
}

impl Thermometers for MockTherms {
    fn device_count(&mut self) -> usize {
        self.temps.len()
    }

    fn set_resolution(&mut self, index: usize, bits: u8) -> bool {
        self.resolutions.push((index, bits));
        true
    }

    fn request_conversion(&mut self) {
        self.conversions += 1;
    }

    fn read_celsius(&mut self, index: usize) -> f32 {
        self.temps[index]
    }
}

/// Builds a 6-byte sensor frame with valid checksums for the given raw
/// temperature and humidity ticks.
pub fn sht_frame(t_ticks: u16, rh_ticks: u16) -> [u8; 6] {
    let t = t_ticks.to_be_bytes();
    let rh = rh_ticks.to_be_bytes();
    [
        t[0],
        t[1],
        crate::sensors::sht_crc8(t_ticks),
        rh[0],
        rh[1],
        crate::sensors::sht_crc8(rh_ticks),
    ]
}

/// Connection double. Bytes written by the code under test accumulate in a
/// log shared with the [`MockNet`] or [`MockListener`] that produced the
/// connection, so it stays inspectable after the connection is dropped.
pub struct MockConn {
    pub input: VecDeque<u8>,
    pub log: Rc<RefCell<Vec<u8>>>,
}

impl MockConn {
    pub fn scripted(input: &[u8]) -> Self {
        Self {
            input: input.iter().copied().collect(),
            log: Rc::new(RefCell::new(Vec::new())),
        }
    }
}

impl Connection for MockConn {
    fn read_byte(&mut self) -> Option<u8> {
        self.input.pop_front()
    }

    fn available(&mut self) -> bool {
        !self.input.is_empty()
    }

    fn write_all(&mut self, bytes: &[u8]) {
        self.log.borrow_mut().extend_from_slice(bytes);
    }

    fn flush(&mut self) {}
}

/// Outbound connector double: each successful connect hands out the next
/// scripted response as the connection's readable side.
#[derive(Default)]
pub struct MockNet {
    pub refuse: bool,
    pub responses: VecDeque<Vec<u8>>,
    pub log: Rc<RefCell<Vec<u8>>>,
    pub connects: Vec<(String, u16)>,
}

impl MockNet {
    pub fn with_response(response: &[u8]) -> Self {
        let mut net = Self::default();
        net.responses.push_back(response.to_vec());
        net
    }

    pub fn log_string(&self) -> String {
        String::from_utf8_lossy(&self.log.borrow()).into_owned()
    }
}

impl Connector for MockNet {
    type Conn = MockConn;

    fn connect(&mut self, host: &str, port: u16) -> Option<MockConn> {
        self.connects.push((host.to_owned(), port));
        if self.refuse {
            return None;
        }
        let input = self.responses.pop_front().unwrap_or_default();
        Some(MockConn {
            input: input.into(),
            log: Rc::clone(&self.log),
        })
    }
}

/// Inbound listener double: each scripted request becomes one client.
#[derive(Default)]
pub struct MockListener {
    pub requests: VecDeque<Vec<u8>>,
    pub log: Rc<RefCell<Vec<u8>>>,
}

impl MockListener {
    pub fn with_request(request: &[u8]) -> Self {
        let mut l = Self::default();
        l.requests.push_back(request.to_vec());
        l
    }

    pub fn log_string(&self) -> String {
        String::from_utf8_lossy(&self.log.borrow()).into_owned()
    }
}

impl Listener for MockListener {
    type Conn = MockConn;

    fn poll_client(&mut self) -> Option<MockConn> {
        let input = self.requests.pop_front()?;
        Some(MockConn {
            input: input.into(),
            log: Rc::clone(&self.log),
        })
    }
}

/// Staging sink double. `accept_limit` caps how many bytes each write
/// takes, for exercising short-write handling.
pub struct MockSink {
    pub begin_ok: bool,
    pub finalize_ok: bool,
    pub accept_limit: Option<usize>,
    pub begun_with: Option<usize>,
    pub written: Vec<u8>,
    pub finalized: usize,
}

impl Default for MockSink {
    fn default() -> Self {
        Self {
            begin_ok: true,
            finalize_ok: true,
            accept_limit: None,
            begun_with: None,
            written: Vec::new(),
            finalized: 0,
        }
    }
}

impl UpdateSink for MockSink {
    fn begin(&mut self, len: usize) -> bool {
        self.begun_with = Some(len);
        self.begin_ok
    }

    fn write(&mut self, chunk: &[u8]) -> usize {
        let n = self.accept_limit.map_or(chunk.len(), |l| chunk.len().min(l));
        self.written.extend_from_slice(&chunk[..n]);
        n
    }

    fn finalize(&mut self) -> bool {
        self.finalized += 1;
        self.finalize_ok
    }
}

pub struct MockSystem {
    pub id: u32,
    pub format_ok: bool,
    pub restarts: usize,
    pub erases: usize,
    pub resets: usize,
    pub formats: usize,
}

impl Default for MockSystem {
    fn default() -> Self {
        Self {
            id: 0xC0FFEE,
            format_ok: true,
            restarts: 0,
            erases: 0,
            resets: 0,
            formats: 0,
        }
    }
}

impl System for MockSystem {
    fn chip_id(&self) -> u32 {
        self.id
    }

    fn restart(&mut self) {
        self.restarts += 1;
    }

    fn erase_config(&mut self) {
        self.erases += 1;
    }

    fn reset(&mut self) {
        self.resets += 1;
    }

    fn format_storage(&mut self) -> bool {
        self.formats += 1;
        self.format_ok
    }
}
