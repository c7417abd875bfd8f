//! Byte-stream contract shared by the WLAN and cellular transports.
//!
//! The session layer drives whichever stream matches the active transport
//! without knowing which one it is. Semantics follow the embedded client
//! convention: counts instead of errors, and `read` only drains what
//! `available` already buffered.

use crate::at::RingBuffer;
use crate::timing::Pacer;
use log::{debug, info, warn};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, TryRecvError};
use std::thread;
use std::time::Duration;

/// Connection timeout for the WLAN client, DNS lookup included.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Overall budget for one `write`.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest single blocking socket send; the watchdog is fed between sends.
const SEND_SLICE: Duration = Duration::from_millis(50);

/// Poll interval for a single socket read.
const READ_POLL: Duration = Duration::from_millis(1);

/// Bytes pulled from the socket per `available` call.
const READ_CHUNK: usize = 256;

/// A single client connection to the broker.
///
/// Callers must call [`ByteStream::available`] before [`ByteStream::read`];
/// `read` never touches the underlying link.
pub trait ByteStream: Send {
    /// Open the connection. Any previous connection is closed first.
    fn connect(&mut self, host: &str, port: u16) -> bool;

    /// Send `buf`. Returns the number of bytes accepted, 0 on any failure.
    fn write(&mut self, buf: &[u8]) -> usize;

    /// Bytes ready to read, pulling from the link at most once when empty.
    fn available(&mut self) -> usize;

    /// Copy buffered bytes into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Close the connection. Idempotent.
    fn stop(&mut self);

    /// Local view of the connection state.
    fn connected(&self) -> bool;
}

fn resolve_and_connect(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let addr = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(ErrorKind::NotFound, "no addresses"))?;
    debug!("Resolved {} to {}", host, addr);
    TcpStream::connect_timeout(&addr, timeout)
}

fn is_retryable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
    )
}

/// [`ByteStream`] over an OS TCP socket, used when WLAN is active.
///
/// Every blocking step is bounded and paced, so the worker keeps feeding the
/// watchdog while a broker is unreachable.
pub struct TcpClient {
    pacer: Pacer,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
    rx: RingBuffer,
}

impl TcpClient {
    pub fn new(pacer: Pacer) -> Self {
        Self {
            pacer,
            connect_timeout: CONNECT_TIMEOUT,
            stream: None,
            rx: RingBuffer::default(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Resolve and connect on a helper thread while the caller idles through
    /// the pacer. A helper that outlives the deadline finishes on its own.
    fn open(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        self.pacer.feed();
        let (tx, rx) = mpsc::channel();
        let target = host.to_string();
        let timeout = self.connect_timeout;
        thread::Builder::new()
            .name("tcp-connect".to_string())
            .spawn(move || {
                let _ = tx.send(resolve_and_connect(&target, port, timeout));
            })?;

        let deadline = self.pacer.deadline(timeout);
        let stream = loop {
            match rx.try_recv() {
                Ok(result) => break result?,
                Err(TryRecvError::Disconnected) => {
                    return Err(io::Error::new(ErrorKind::Other, "connect helper exited"))
                }
                Err(TryRecvError::Empty) => {}
            }
            if self.pacer.expired(deadline) {
                return Err(io::Error::new(ErrorKind::TimedOut, "connect timed out"));
            }
            self.pacer.idle_until(deadline);
        };

        stream.set_read_timeout(Some(READ_POLL))?;
        stream.set_write_timeout(Some(SEND_SLICE))?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to disable Nagle's algorithm: {}", e);
        }
        Ok(stream)
    }

    /// Send all of `buf` in bounded slices, feeding the watchdog in between.
    fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        let Self { pacer, stream, .. } = self;
        let Some(stream) = stream.as_mut() else {
            return Err(io::Error::new(ErrorKind::NotConnected, "not connected"));
        };
        let deadline = pacer.deadline(WRITE_TIMEOUT);
        let mut sent = 0;
        while sent < buf.len() {
            match stream.write(&buf[sent..]) {
                Ok(0) => return Err(io::Error::new(ErrorKind::WriteZero, "socket closed")),
                Ok(n) => sent += n,
                Err(e) if is_retryable(&e) => {
                    if pacer.expired(deadline) {
                        return Err(io::Error::new(ErrorKind::TimedOut, "write timed out"));
                    }
                }
                Err(e) => return Err(e),
            }
            pacer.feed();
        }
        stream.flush()
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }
}

impl Default for TcpClient {
    fn default() -> Self {
        Self::new(Pacer::system())
    }
}

impl ByteStream for TcpClient {
    fn connect(&mut self, host: &str, port: u16) -> bool {
        self.stop();
        match self.open(host, port) {
            Ok(stream) => {
                info!("TCP connected to {}:{}", host, port);
                self.stream = Some(stream);
                true
            }
            Err(e) => {
                warn!("TCP connection to {}:{} failed: {}", host, port, e);
                false
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        if self.stream.is_none() {
            return 0;
        }
        match self.send(buf) {
            Ok(()) => buf.len(),
            Err(e) => {
                warn!("TCP write of {} bytes failed: {}", buf.len(), e);
                self.close();
                0
            }
        }
    }

    fn available(&mut self) -> usize {
        if !self.rx.is_empty() {
            return self.rx.len();
        }
        let Some(stream) = self.stream.as_mut() else {
            return 0;
        };

        let mut chunk = [0u8; READ_CHUNK];
        let want = self.rx.free().min(READ_CHUNK);
        match stream.read(&mut chunk[..want]) {
            Ok(0) => {
                info!("TCP peer closed the connection");
                self.close();
            }
            Ok(n) => {
                self.rx.push(&chunk[..n]);
            }
            Err(e) if is_retryable(&e) => {}
            Err(e) => {
                warn!("TCP read failed: {}", e);
                self.close();
            }
        }
        self.rx.len()
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        self.rx.pop_into(buf)
    }

    fn stop(&mut self) {
        self.close();
        self.rx.clear();
    }

    fn connected(&self) -> bool {
        self.stream.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{manual_pacer, CountingWatchdog};
    use crate::timing::{Clock, SystemClock};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::time::Instant;

    fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    fn wait_available(client: &mut TcpClient) -> usize {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            let n = client.available();
            if n > 0 {
                return n;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        0
    }

    #[test]
    fn test_round_trip_over_loopback() {
        let (listener, port) = listener();
        let mut client = TcpClient::default();
        assert!(client.connect("127.0.0.1", port));
        assert!(client.connected());

        let (mut peer, _) = listener.accept().unwrap();
        assert_eq!(client.write(b"ping"), 4);
        let mut got = [0u8; 4];
        peer.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"ping");

        peer.write_all(b"pong").unwrap();
        assert_eq!(wait_available(&mut client), 4);
        let mut buf = [0u8; 8];
        assert_eq!(client.read(&mut buf), 4);
        assert_eq!(&buf[..4], b"pong");
    }

    #[test]
    fn test_read_without_available_returns_nothing() {
        let (listener, port) = listener();
        let mut client = TcpClient::default();
        assert!(client.connect("127.0.0.1", port));
        let (mut peer, _) = listener.accept().unwrap();
        peer.write_all(b"data").unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(client.read(&mut buf), 0);
    }

    #[test]
    fn test_peer_close_marks_disconnected() {
        let (listener, port) = listener();
        let mut client = TcpClient::default();
        assert!(client.connect("127.0.0.1", port));
        let (peer, _) = listener.accept().unwrap();
        drop(peer);

        let deadline = Instant::now() + Duration::from_secs(2);
        while client.connected() && Instant::now() < deadline {
            client.available();
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!client.connected());
    }

    #[test]
    fn test_connect_refused() {
        let (listener, port) = listener();
        drop(listener);
        let mut client = TcpClient::default();
        assert!(!client.connect("127.0.0.1", port));
        assert!(!client.connected());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut client = TcpClient::default();
        client.stop();
        client.stop();
        assert!(!client.connected());
        assert_eq!(client.write(b"x"), 0);
        assert_eq!(client.available(), 0);
    }

    // ==================== Watchdog Tests ====================

    #[test]
    fn test_unanswered_connect_is_bounded_and_feeds_watchdog() {
        let (pacer, clock, watchdog) = manual_pacer();
        let timeout = Duration::from_millis(200);
        let mut client = TcpClient::new(pacer.clone()).with_connect_timeout(timeout);
        let start = clock.now();

        // TEST-NET-1, nothing answers there
        assert!(!client.connect("192.0.2.1", 9));

        assert!(!client.connected());
        assert!(watchdog.count() >= 1);
        assert!(clock.now() - start <= timeout + pacer.quantum());
    }

    #[test]
    fn test_write_feeds_watchdog() {
        let watchdog = Arc::new(CountingWatchdog::default());
        let pacer = Pacer::new(Arc::new(SystemClock), watchdog.clone());
        let (listener, port) = listener();
        let mut client = TcpClient::new(pacer);
        assert!(client.connect("127.0.0.1", port));
        let (_peer, _) = listener.accept().unwrap();

        let before = watchdog.count();
        assert_eq!(client.write(b"ping"), 4);
        assert!(watchdog.count() > before);
    }
}
