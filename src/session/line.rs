//! Newline-delimited session for bench testing.
//!
//! Speaks a tiny text protocol to a plain TCP listener (`nc -l 1883` is
//! enough):
//!
//! ```text
//! -> HELLO <client_id>
//! -> SUB <topic>
//! -> PUB <topic> <payload>
//! <- MSG <topic> <payload>
//! ```
//!
//! Payloads must not contain newlines.

use super::{SessionError, SessionLayer};
use crate::config::BrokerConfig;
use crate::stream::ByteStream;
use crate::timing::Pacer;
use log::{debug, info, warn};

/// Longest inbound line kept; longer lines are discarded.
pub const MAX_LINE_LEN: usize = 256;

/// Inbound bytes handled per `service` call; the rest waits for the next tick.
pub const MAX_SERVICE_BYTES: usize = 16 * MAX_LINE_LEN;

#[derive(Debug, Default)]
pub struct LineSession {
    pacer: Pacer,
    pending: Vec<u8>,
    overflowed: bool,
    last_message: Option<String>,
}

impl LineSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed `pacer`'s watchdog while draining inbound traffic.
    pub fn with_pacer(mut self, pacer: Pacer) -> Self {
        self.pacer = pacer;
        self
    }

    fn send_line(stream: &mut dyn ByteStream, line: &str) -> Result<(), SessionError> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        let written = stream.write(&bytes);
        if written == bytes.len() {
            Ok(())
        } else {
            Err(SessionError::WriteFailed {
                expected: bytes.len(),
                written,
            })
        }
    }

    fn handle_line(&mut self, line: &str) {
        let mut parts = line.splitn(3, ' ');
        match parts.next() {
            Some("MSG") => {
                let topic = parts.next().unwrap_or("");
                let payload = parts.next().unwrap_or("");
                info!("Received on {}: {}", topic, payload);
                self.last_message = Some(payload.to_string());
            }
            Some("PING") | Some("OK") => {}
            _ => debug!("Ignoring line {:?}", line),
        }
    }

    fn absorb(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if b == b'\n' {
                if self.overflowed {
                    warn!("Discarded inbound line longer than {} bytes", MAX_LINE_LEN);
                } else {
                    let line = String::from_utf8_lossy(&self.pending)
                        .trim_end_matches('\r')
                        .to_string();
                    self.handle_line(&line);
                }
                self.pending.clear();
                self.overflowed = false;
            } else if self.pending.len() < MAX_LINE_LEN {
                self.pending.push(b);
            } else {
                self.overflowed = true;
            }
        }
    }
}

impl SessionLayer for LineSession {
    fn open(
        &mut self,
        stream: &mut dyn ByteStream,
        broker: &BrokerConfig,
    ) -> Result<(), SessionError> {
        self.pending.clear();
        self.overflowed = false;
        Self::send_line(stream, &format!("HELLO {}", broker.client_id))?;
        Self::send_line(stream, &format!("SUB {}", broker.subscribe_topic))?;
        info!("Subscribed to {}", broker.subscribe_topic);
        Ok(())
    }

    fn service(&mut self, stream: &mut dyn ByteStream) -> Result<(), SessionError> {
        let mut buf = [0u8; 64];
        let mut handled = 0;
        while handled < MAX_SERVICE_BYTES && stream.available() > 0 {
            let room = buf.len().min(MAX_SERVICE_BYTES - handled);
            let n = stream.read(&mut buf[..room]);
            if n == 0 {
                break;
            }
            handled += n;
            self.absorb(&buf[..n]);
            self.pacer.feed();
        }
        if stream.connected() {
            Ok(())
        } else {
            Err(SessionError::NotConnected)
        }
    }

    fn publish(
        &mut self,
        stream: &mut dyn ByteStream,
        topic: &str,
        payload: &[u8],
    ) -> Result<(), SessionError> {
        if payload.contains(&b'\n') {
            return Err(SessionError::Protocol("payload contains a newline".to_string()));
        }
        let payload = std::str::from_utf8(payload)
            .map_err(|_| SessionError::Protocol("payload is not UTF-8".to_string()))?;
        Self::send_line(stream, &format!("PUB {} {}", topic, payload))
    }

    fn last_message(&self) -> Option<&str> {
        self.last_message.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{manual_pacer, MemoryStream};

    #[test]
    fn test_open_sends_hello_and_subscribe() {
        let mut session = LineSession::new();
        let mut stream = MemoryStream::default();
        session.open(&mut stream, &BrokerConfig::default()).unwrap();

        assert_eq!(
            String::from_utf8(stream.written).unwrap(),
            "HELLO fieldlink-node\nSUB fieldlink/commands\n"
        );
    }

    #[test]
    fn test_publish_frames_line() {
        let mut session = LineSession::new();
        let mut stream = MemoryStream::default();
        session
            .publish(&mut stream, "fieldlink/telemetry", br#"{"uptime":5}"#)
            .unwrap();

        assert_eq!(
            String::from_utf8(stream.written).unwrap(),
            "PUB fieldlink/telemetry {\"uptime\":5}\n"
        );
    }

    #[test]
    fn test_publish_rejects_newline() {
        let mut session = LineSession::new();
        let mut stream = MemoryStream::default();
        assert!(matches!(
            session.publish(&mut stream, "t", b"a\nb"),
            Err(SessionError::Protocol(_))
        ));
        assert!(stream.written.is_empty());
    }

    #[test]
    fn test_short_write_is_failure() {
        let mut session = LineSession::new();
        let mut stream = MemoryStream {
            short_write: true,
            ..Default::default()
        };
        assert_eq!(
            session.publish(&mut stream, "t", b"x"),
            Err(SessionError::WriteFailed {
                expected: 8,
                written: 0
            })
        );
    }

    #[test]
    fn test_service_records_inbound_message() {
        let mut session = LineSession::new();
        let mut stream = MemoryStream::default();
        stream
            .inbound
            .extend(b"OK\r\nMSG fieldlink/commands reboot now\n".iter().copied());

        session.service(&mut stream).unwrap();
        assert_eq!(session.last_message(), Some("reboot now"));
    }

    #[test]
    fn test_service_discards_overlong_line() {
        let mut session = LineSession::new();
        let mut stream = MemoryStream::default();
        let mut data = b"MSG t ".to_vec();
        data.extend(std::iter::repeat(b'x').take(MAX_LINE_LEN));
        data.extend_from_slice(b"\nMSG t short\n");
        stream.inbound.extend(data);

        session.service(&mut stream).unwrap();
        assert_eq!(session.last_message(), Some("short"));
    }

    #[test]
    fn test_service_reports_closed_stream() {
        let mut session = LineSession::new();
        let mut stream = MemoryStream::default();
        stream.stop();
        assert_eq!(session.service(&mut stream), Err(SessionError::NotConnected));
    }

    #[test]
    fn test_service_caps_bytes_per_call() {
        let (pacer, _, watchdog) = manual_pacer();
        let mut session = LineSession::new().with_pacer(pacer);
        let mut stream = MemoryStream::default();
        let line = b"MSG t 1234567\n";
        let total = line.len() * 1000;
        for _ in 0..1000 {
            stream.inbound.extend(line.iter().copied());
        }
        assert!(total > MAX_SERVICE_BYTES);

        session.service(&mut stream).unwrap();
        assert_eq!(stream.inbound.len(), total - MAX_SERVICE_BYTES);
        assert!(stream.buffered.is_empty());
        assert_eq!(session.last_message(), Some("1234567"));
        assert!(watchdog.count() >= 1);

        // the rest drains over later calls
        for _ in 0..3 {
            session.service(&mut stream).unwrap();
        }
        assert!(stream.inbound.is_empty());
    }
}
