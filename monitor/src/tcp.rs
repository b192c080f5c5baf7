//! TCP-backed network handles. Works on the host build directly and on the
//! ESP target through ESP-IDF's std networking.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

use log::{debug, warn};

use vivarium_common::hal::{Connection, Connector, Listener};
use vivarium_common::http::HTTP_TIMEOUT_MS;

/// A stream with a small read buffer so the byte-at-a-time parsers don't
/// syscall per byte.
pub struct TcpConn {
    stream: TcpStream,
    buf: [u8; 64],
    start: usize,
    end: usize,
}

impl TcpConn {
    fn new(stream: TcpStream) -> std::io::Result<Self> {
        stream.set_read_timeout(Some(Duration::from_millis(HTTP_TIMEOUT_MS)))?;
        Ok(Self {
            stream,
            buf: [0; 64],
            start: 0,
            end: 0,
        })
    }
}

impl Connection for TcpConn {
    fn read_byte(&mut self) -> Option<u8> {
        if self.start == self.end {
            match self.stream.read(&mut self.buf) {
                Ok(0) | Err(_) => return None,
                Ok(n) => {
                    self.start = 0;
                    self.end = n;
                }
            }
        }
        let b = self.buf[self.start];
        self.start += 1;
        Some(b)
    }

    fn available(&mut self) -> bool {
        if self.start != self.end {
            return true;
        }
        if self.stream.set_nonblocking(true).is_err() {
            return false;
        }
        let mut probe = [0u8; 1];
        let pending = matches!(self.stream.peek(&mut probe), Ok(n) if n > 0);
        let _ = self.stream.set_nonblocking(false);
        pending
    }

    fn write_all(&mut self, bytes: &[u8]) {
        if let Err(err) = self.stream.write_all(bytes) {
            warn!("tcp write failed: {err}");
        }
    }

    fn flush(&mut self) {
        let _ = self.stream.flush();
    }
}

/// Outbound connector over plain TCP.
pub struct TcpNet;

impl Connector for TcpNet {
    type Conn = TcpConn;

    fn connect(&mut self, host: &str, port: u16) -> Option<TcpConn> {
        match TcpStream::connect((host, port)) {
            Ok(stream) => match TcpConn::new(stream) {
                Ok(conn) => Some(conn),
                Err(err) => {
                    warn!("could not configure socket to {host}:{port}: {err}");
                    None
                }
            },
            Err(err) => {
                warn!("could not connect to {host}:{port}: {err}");
                None
            }
        }
    }
}

/// Non-blocking accept loop for the web interface; at most one client is
/// handled per control tick.
pub struct TcpServer {
    listener: TcpListener,
}

impl TcpServer {
    pub fn bind(port: u16) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener })
    }
}

impl Listener for TcpServer {
    type Conn = TcpConn;

    fn poll_client(&mut self) -> Option<TcpConn> {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                debug!("web client connected from {peer}");
                // The accepted socket must block so reads honor the timeout.
                if stream.set_nonblocking(false).is_err() {
                    return None;
                }
                TcpConn::new(stream).ok()
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => None,
            Err(err) => {
                warn!("accept failed: {err}");
                None
            }
        }
    }
}
