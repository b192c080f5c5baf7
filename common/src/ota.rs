//! Staged over-the-air firmware updates.
//!
//! The device polls its update URL with its running version in an
//! `X-FWVER` header; the server answers 304 when nothing newer exists and
//! 200 with an image body when something does. The image is streamed into
//! the staging sink and the device restarts only after the sink validates
//! the complete image.

use log::{info, warn};

use crate::config::Url;
use crate::hal::{Connection, Connector, System, UpdateSink};
use crate::http::{read_response, HttpError, USER_AGENT};
use crate::FIRMWARE_VERSION;

/// Seconds between update checks.
pub const FIRMWARE_CHECK_SECONDS: i64 = 14_400;

const STAGE_CHUNK: usize = 256;

pub struct FirmwareUpdater {
    update_url: Url,
    last_check: i64,
}

impl FirmwareUpdater {
    pub fn new(update_url: Url) -> Self {
        Self {
            update_url,
            last_check: 0,
        }
    }

    pub fn url(&self) -> &Url {
        &self.update_url
    }

    pub fn last_check(&self) -> i64 {
        self.last_check
    }

    /// Checks for new firmware when the check interval has elapsed. On a
    /// successfully staged image this restarts the device and does not
    /// return.
    pub fn update_firmware(
        &mut self,
        now: i64,
        net: &mut impl Connector,
        sink: &mut impl UpdateSink,
        sys: &mut impl System,
    ) {
        if !self.update_url.set || now - self.last_check < FIRMWARE_CHECK_SECONDS {
            return;
        }
        self.last_check = now;

        info!("checking for firmware update at {}", self.update_url);
        let Some(mut conn) = net.connect(&self.update_url.host, self.update_url.port) else {
            warn!("could not connect to {}", self.update_url);
            return;
        };

        let request = format!(
            "GET {} HTTP/1.0\r\n\
             Host: {}:{}\r\n\
             User-Agent: {}\r\n\
             Connection: close\r\n\
             Content-Length: 0\r\n\
             X-FWVER: {}\r\n\r\n",
            self.update_url.path, self.update_url.host, self.update_url.port, USER_AGENT, FIRMWARE_VERSION,
        );
        conn.write_all(request.as_bytes());
        conn.flush();

        let mut staged = false;
        let result = read_response(
            &mut conn,
            Some(&mut |stream: &mut _, len| {
                staged = stage_firmware(stream, len, sink);
            }),
        );
        match result {
            Err(HttpError::Timeout) => warn!("timed out fetching firmware"),
            Ok(304) => info!("firmware is up to date"),
            Ok(200) if staged => {
                info!("firmware staged, restarting");
                sys.restart();
            }
            Ok(status) => warn!("firmware check failed with status {status}"),
        }
    }
}

/// Streams `len` body bytes into the staging sink. Returns whether the
/// complete image landed and validated.
fn stage_firmware(stream: &mut impl Connection, len: usize, sink: &mut impl UpdateSink) -> bool {
    if len == 0 {
        warn!("update server sent an empty image");
        return false;
    }
    if !sink.begin(len) {
        warn!("not enough space to stage {len} byte image");
        return false;
    }

    let mut written = 0;
    let mut chunk = [0u8; STAGE_CHUNK];
    while written < len {
        let want = STAGE_CHUNK.min(len - written);
        let got = stream.read(&mut chunk[..want]);
        if got == 0 {
            break;
        }
        let accepted = sink.write(&chunk[..got]);
        written += accepted;
        if accepted != got {
            break;
        }
    }
    if written != len {
        warn!("firmware image truncated at {written} of {len} bytes");
        return false;
    }
    if !sink.finalize() {
        warn!("staged firmware failed validation");
        return false;
    }
    true
}
