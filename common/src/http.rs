//! Minimal streaming HTTP/1.x response parsing.
//!
//! The parser holds a fixed 14-byte window over the header stream, so
//! memory stays bounded no matter how large the response headers are. The
//! only header it cares about is Content-Length.

use thiserror::Error;

use crate::hal::Connection;

/// Milliseconds a connection may sit idle before reads give up.
pub const HTTP_TIMEOUT_MS: u64 = 8_000;

pub const USER_AGENT: &str = "VivMonitor1.0";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HttpError {
    #[error("timed out waiting for response")]
    Timeout,
}

const MARKER: &[u8] = b"HTTP/1.";

/// Reads a response up to the end of its headers and returns the status
/// code. On a 200 the optional callback is invoked with the connection
/// positioned at the first body byte and the advertised Content-Length
/// (zero when the header is absent).
pub fn read_response<C: Connection>(
    conn: &mut C,
    body: Option<&mut dyn FnMut(&mut C, usize)>,
) -> Result<u16, HttpError> {
    // Scan for the protocol marker, tolerating any noise before it.
    let mut matched = 0;
    while matched < MARKER.len() {
        let b = conn.read_byte().ok_or(HttpError::Timeout)?;
        if b == MARKER[matched] {
            matched += 1;
        } else {
            matched = usize::from(b == MARKER[0]);
        }
    }
    // Minor version digit, then the status code.
    conn.read_byte().ok_or(HttpError::Timeout)?;
    let mut b = conn.read_byte().ok_or(HttpError::Timeout)?;
    while !b.is_ascii_digit() {
        b = conn.read_byte().ok_or(HttpError::Timeout)?;
    }
    let mut status: u16 = 0;
    while b.is_ascii_digit() {
        status = status * 10 + u16::from(b - b'0');
        b = conn.read_byte().ok_or(HttpError::Timeout)?;
    }
    while b != b'\n' {
        b = conn.read_byte().ok_or(HttpError::Timeout)?;
    }

    let mut window = [0u8; 14];
    let mut in_header = false;
    let mut content_length: usize = 0;
    loop {
        let Some(b) = conn.read_byte() else { break };
        if b == b':' {
            in_header = true;
        } else if b == b'\n' {
            if in_header {
                in_header = false;
            } else {
                // Blank line: headers are done.
                break;
            }
        }
        window.rotate_left(1);
        window[13] = b;
        if window.eq_ignore_ascii_case(b"Content-Length") {
            let term = read_length(conn, &mut content_length);
            in_header = term != Some(b'\n');
            if term.is_none() {
                break;
            }
        }
    }

    if status == 200 {
        if let Some(callback) = body {
            callback(conn, content_length);
        }
    }
    Ok(status)
}

/// Parses the decimal value after a Content-Length name, returning the
/// byte that terminated the digits.
fn read_length<C: Connection>(conn: &mut C, out: &mut usize) -> Option<u8> {
    let mut b = conn.read_byte()?;
    while b == b':' || b == b' ' {
        b = conn.read_byte()?;
    }
    let mut len: usize = 0;
    while b.is_ascii_digit() {
        len = len * 10 + usize::from(b - b'0');
        b = conn.read_byte()?;
    }
    *out = len;
    Some(b)
}
