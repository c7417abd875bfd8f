//! Command/response exchange over the modem serial port.
//!
//! Every wait is bounded by a deadline and polls through the [`Pacer`], so the
//! watchdog is fed at least once per quantum while the modem is thinking.
//! Stale bytes (late replies to abandoned commands, URCs) are drained before
//! each new command.

use super::response::{parse_rxget_header, ResponseBuffer};
use super::serial::SerialPort;
use crate::timing::Pacer;
use log::{debug, trace, warn};
use std::fmt;
use std::io;
use std::time::Duration;

/// Bytes read from the port per pump iteration.
const READ_CHUNK: usize = 64;

/// Upper bound on chunks read by one pump, so a chatty modem cannot starve
/// the watchdog.
const MAX_CHUNKS_PER_PUMP: usize = 16;

/// Unsolicited notice that the peer closed the socket.
const CLOSED_URC: &str = "CLOSED\r\n";

/// Errors from the AT layer.
#[derive(Debug)]
pub enum AtError {
    /// No terminator arrived before the deadline.
    Timeout { command: String },
    /// The modem answered with an error terminator.
    Rejected { command: String, response: String },
    /// A data response ended before the announced length.
    Truncated { expected: usize, received: usize },
    /// The response did not have the expected shape.
    Desync(String),
    /// Operation needs an open socket.
    NotConnected,
    /// Modem is not registered on the network.
    NotRegistered,
    /// Serial port failure.
    Io(io::Error),
}

impl fmt::Display for AtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { command } => write!(f, "timeout waiting for reply to {}", command),
            Self::Rejected { command, response } => {
                write!(f, "{} rejected: {}", command, response.trim())
            }
            Self::Truncated { expected, received } => write!(
                f,
                "truncated data response: expected {} bytes, got {}",
                expected, received
            ),
            Self::Desync(detail) => write!(f, "protocol desync: {}", detail),
            Self::NotConnected => write!(f, "socket not open"),
            Self::NotRegistered => write!(f, "not registered on network"),
            Self::Io(e) => write!(f, "serial I/O error: {}", e),
        }
    }
}

impl std::error::Error for AtError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for AtError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Render a command for logs and errors without leaking APN credentials.
fn redact(command: &str) -> String {
    if command.starts_with("AT+CSTT") {
        "AT+CSTT=****".to_string()
    } else {
        command.to_string()
    }
}

/// Exclusive owner of the modem serial port.
pub struct AtChannel<S> {
    port: S,
    pacer: Pacer,
    response: ResponseBuffer,
    /// Redacted name of the command currently awaiting a reply.
    pending: String,
    peer_closed: bool,
}

impl<S: SerialPort> AtChannel<S> {
    pub fn new(port: S, pacer: Pacer) -> Self {
        Self {
            port,
            pacer,
            response: ResponseBuffer::new(),
            pending: String::new(),
            peer_closed: false,
        }
    }

    pub fn pacer(&self) -> &Pacer {
        &self.pacer
    }

    /// Move pending port bytes into the response buffer.
    fn pump(&mut self) -> Result<usize, AtError> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut total = 0;
        for _ in 0..MAX_CHUNKS_PER_PUMP {
            let n = self.port.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            self.response.extend(&chunk[..n]);
            total += n;
        }
        Ok(total)
    }

    fn note_urcs(&mut self) {
        if self.response.contains(CLOSED_URC) {
            if !self.peer_closed {
                debug!("Modem reports socket closed by peer");
            }
            self.peer_closed = true;
        }
    }

    /// Discard everything the modem sent since the last exchange.
    pub fn drain(&mut self) -> Result<(), AtError> {
        self.pump()?;
        if !self.response.is_empty() {
            self.note_urcs();
            trace!("Drained {} stale bytes: {:?}", self.response.len(), self.response.text());
            self.response.clear();
        }
        Ok(())
    }

    /// Returns true once if a `CLOSED` notice was seen since the last call.
    pub fn take_peer_closed(&mut self) -> bool {
        std::mem::take(&mut self.peer_closed)
    }

    /// Send a command line (a carriage return is appended).
    pub fn send(&mut self, command: &str) -> Result<(), AtError> {
        self.pending = redact(command);
        debug!("AT> {}", self.pending);
        let mut line = Vec::with_capacity(command.len() + 1);
        line.extend_from_slice(command.as_bytes());
        line.push(b'\r');
        self.port.write_all(&line)?;
        Ok(())
    }

    /// Write raw payload bytes (after a `>` prompt).
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), AtError> {
        trace!("AT> <{} raw bytes>", bytes.len());
        self.port.write_all(bytes)?;
        Ok(())
    }

    /// Wait until the response contains one of `ok` or one of `errors`.
    ///
    /// Returns the accumulated response text on success and clears the buffer.
    pub fn expect(
        &mut self,
        ok: &[&str],
        errors: &[&str],
        timeout: Duration,
    ) -> Result<String, AtError> {
        self.expect_parsed(
            |text| ok.iter().any(|t| text.contains(t)).then(|| text.to_string()),
            errors,
            timeout,
        )
    }

    /// Wait until `parse` accepts the accumulated response.
    pub fn expect_parsed<T>(
        &mut self,
        parse: impl Fn(&str) -> Option<T>,
        errors: &[&str],
        timeout: Duration,
    ) -> Result<T, AtError> {
        let deadline = self.pacer.deadline(timeout);
        loop {
            if self.pump()? > 0 {
                self.note_urcs();
                let text = self.response.text();
                trace!("AT< {:?}", text);
                if let Some(err) = errors.iter().find(|e| text.contains(*e)) {
                    self.response.clear();
                    debug!("{} failed with {}", self.pending, err);
                    return Err(AtError::Rejected {
                        command: self.pending.clone(),
                        response: text,
                    });
                }
                if let Some(value) = parse(&text) {
                    self.response.clear();
                    return Ok(value);
                }
            }
            if self.pacer.expired(deadline) {
                debug!(
                    "{} timed out after {:?} ({} bytes pending)",
                    self.pending,
                    timeout,
                    self.response.len()
                );
                return Err(AtError::Timeout {
                    command: self.pending.clone(),
                });
            }
            self.pacer.idle_until(deadline);
        }
    }

    /// Drain, send, and wait for one of the terminators.
    pub fn exchange(
        &mut self,
        command: &str,
        ok: &[&str],
        errors: &[&str],
        timeout: Duration,
    ) -> Result<String, AtError> {
        self.drain()?;
        self.send(command)?;
        self.expect(ok, errors, timeout)
    }

    /// Plain command terminated by `OK` or `ERROR`.
    pub fn command(&mut self, command: &str, timeout: Duration) -> Result<String, AtError> {
        self.exchange(command, &["OK"], &["ERROR"], timeout)
    }

    /// Collect the reply to `AT+CIPRXGET=2,<max>`.
    ///
    /// Reads the numeric header, then exactly that many raw bytes, then the
    /// final `OK`. A response that ends early is discarded whole.
    pub fn receive_payload(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>, AtError> {
        let deadline = self.pacer.deadline(timeout);
        // (payload start, announced length) once the header is complete
        let mut framing: Option<(usize, usize)> = None;

        loop {
            self.pump()?;

            if framing.is_none() {
                if let Some(start) = self.response.find("+CIPRXGET: 2,") {
                    if let Some(end) = self.response.line_end(start) {
                        let line = String::from_utf8_lossy(&self.response.as_bytes()[start..end])
                            .into_owned();
                        let header = parse_rxget_header(&line)
                            .ok_or_else(|| AtError::Desync(format!("bad header {:?}", line)))?;
                        if header.len > max {
                            self.response.clear();
                            return Err(AtError::Desync(format!(
                                "modem sent {} bytes, asked for at most {}",
                                header.len, max
                            )));
                        }
                        trace!("Data header: {} bytes, {} remaining", header.len, header.remaining);
                        framing = Some((end, header.len));
                    }
                } else if self.response.contains("ERROR") {
                    let response = self.response.text();
                    self.response.clear();
                    return Err(AtError::Rejected {
                        command: self.pending.clone(),
                        response,
                    });
                } else if self.response.contains("OK") {
                    // nothing buffered in the modem
                    self.response.clear();
                    return Ok(Vec::new());
                }
            }

            if let Some((start, len)) = framing {
                let have = self.response.len().saturating_sub(start);
                if have >= len && self.response.find_from("OK", start + len).is_some() {
                    self.response.consume(start);
                    let payload = self.response.consume(len);
                    self.response.clear();
                    return Ok(payload);
                }
            }

            if self.pacer.expired(deadline) {
                return Err(match framing {
                    Some((start, len)) => {
                        let received = self.response.len().saturating_sub(start).min(len);
                        warn!("Discarding truncated payload ({}/{} bytes)", received, len);
                        self.response.clear();
                        AtError::Truncated {
                            expected: len,
                            received,
                        }
                    }
                    None => AtError::Timeout {
                        command: self.pending.clone(),
                    },
                });
            }
            self.pacer.idle_until(deadline);
        }
    }
}
