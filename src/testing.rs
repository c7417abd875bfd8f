//! Test doubles shared by the unit tests.

use crate::at::{AtError, SerialPort};
use crate::config::{CellularCredentials, WifiCredentials};
use crate::probe::{CellularLink, SignalResult, WifiLink};
use crate::stream::ByteStream;
use crate::timing::{Clock, Pacer, Watchdog};
use crate::wifi::WifiError;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// Counter to ensure unique test files even in parallel execution
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Fresh path in the temp directory.
pub fn unique_temp_path(prefix: &str, ext: &str) -> PathBuf {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    let pid = std::process::id();
    std::env::temp_dir().join(format!("fieldlink-{}-{}-{}.{}", prefix, pid, id, ext))
}

/// Clock that only moves when slept on or advanced.
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[derive(Default)]
pub struct CountingWatchdog {
    feeds: AtomicUsize,
}

impl CountingWatchdog {
    pub fn count(&self) -> usize {
        self.feeds.load(Ordering::SeqCst)
    }
}

impl Watchdog for CountingWatchdog {
    fn feed(&self) {
        self.feeds.fetch_add(1, Ordering::SeqCst);
    }
}

/// Pacer over a manual clock and a counting watchdog.
pub fn manual_pacer() -> (Pacer, Arc<ManualClock>, Arc<CountingWatchdog>) {
    let clock = Arc::new(ManualClock::new());
    let watchdog = Arc::new(CountingWatchdog::default());
    (Pacer::new(clock.clone(), watchdog.clone()), clock, watchdog)
}

#[derive(Default)]
struct ScriptState {
    /// (expected write prefix, reply), matched in order.
    rules: VecDeque<(Vec<u8>, Vec<u8>)>,
    inbound: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
}

/// Modem that answers writes from a script.
///
/// Each write is compared against the next rule only; a matching write queues
/// that rule's reply for reading. Unmatched writes get no reply, which is how a
/// silent modem is simulated.
#[derive(Clone, Default)]
pub struct ScriptedSerial {
    inner: Arc<Mutex<ScriptState>>,
}

impl ScriptedSerial {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect(&self, prefix: &str, reply: &str) {
        self.expect_bytes(prefix, reply.as_bytes().to_vec());
    }

    pub fn expect_bytes(&self, prefix: &str, reply: Vec<u8>) {
        self.inner
            .lock()
            .unwrap()
            .rules
            .push_back((prefix.as_bytes().to_vec(), reply));
    }

    /// Queue unsolicited bytes.
    pub fn inject(&self, bytes: &[u8]) {
        self.inner.lock().unwrap().inbound.extend(bytes.iter().copied());
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.inner.lock().unwrap().writes.clone()
    }

    /// Writes as text with the trailing carriage return removed.
    pub fn write_lines(&self) -> Vec<String> {
        self.writes()
            .iter()
            .map(|w| String::from_utf8_lossy(w).trim_end_matches('\r').to_string())
            .collect()
    }

    pub fn clear_writes(&self) {
        self.inner.lock().unwrap().writes.clear();
    }
}

impl SerialPort for ScriptedSerial {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.inner.lock().unwrap();
        state.writes.push(bytes.to_vec());
        let matched = state
            .rules
            .front()
            .map_or(false, |(prefix, _)| bytes.starts_with(prefix));
        if matched {
            if let Some((_, reply)) = state.rules.pop_front() {
                state.inbound.extend(reply);
            }
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.inner.lock().unwrap();
        let n = buf.len().min(state.inbound.len());
        for slot in buf.iter_mut().take(n) {
            *slot = state.inbound.pop_front().unwrap_or_default();
        }
        Ok(n)
    }
}

/// WLAN radio stand-in.
pub struct FakeWifi {
    /// `None` when no access point is in range.
    pub rssi: Option<i32>,
    /// Polls of `is_associated` after `begin` until association completes.
    pub polls_to_associate: u32,
    pub associated: bool,
    pending: bool,
    polls: Cell<u32>,
    pub fail_begin: bool,
    pub begins: u32,
    pub disconnects: u32,
    pub last_password: Option<String>,
}

impl FakeWifi {
    pub fn in_range(rssi: i32) -> Self {
        Self {
            rssi: Some(rssi),
            polls_to_associate: 1,
            associated: false,
            pending: false,
            polls: Cell::new(0),
            fail_begin: false,
            begins: 0,
            disconnects: 0,
            last_password: None,
        }
    }

    pub fn out_of_range() -> Self {
        Self {
            rssi: None,
            ..Self::in_range(0)
        }
    }

    pub fn associate_after(mut self, polls: u32) -> Self {
        self.polls_to_associate = polls;
        self
    }

    /// Access point disappears.
    pub fn drop_out(&mut self) {
        self.rssi = None;
        self.associated = false;
        self.pending = false;
    }
}

impl WifiLink for FakeWifi {
    fn begin(&mut self, credentials: &WifiCredentials) -> Result<(), WifiError> {
        self.begins += 1;
        self.last_password = Some(credentials.password.clone());
        if self.fail_begin {
            return Err(WifiError::ConnectionFailed("radio busy".to_string()));
        }
        self.pending = true;
        self.polls.set(0);
        Ok(())
    }

    fn is_associated(&self) -> bool {
        if self.associated {
            return true;
        }
        if !self.pending || self.rssi.is_none() {
            return false;
        }
        self.polls.set(self.polls.get() + 1);
        self.polls.get() >= self.polls_to_associate
    }

    fn rssi(&self) -> Option<i32> {
        if self.is_associated() {
            self.rssi
        } else {
            None
        }
    }

    fn disconnect(&mut self) {
        self.disconnects += 1;
        self.associated = false;
        self.pending = false;
    }
}

/// Cellular modem stand-in with a fixed probe result.
pub struct FakeCellular {
    pub result: SignalResult,
    pub probes: u32,
    pub restarts: u32,
    pub apn: Option<String>,
}

impl FakeCellular {
    pub fn reporting(result: SignalResult) -> Self {
        Self {
            result,
            probes: 0,
            restarts: 0,
            apn: None,
        }
    }
}

impl CellularLink for FakeCellular {
    fn probe_cellular(&mut self) -> SignalResult {
        self.probes += 1;
        self.result
    }

    fn set_credentials(&mut self, credentials: CellularCredentials) {
        self.apn = Some(credentials.apn.clone());
    }

    fn restart(&mut self) -> Result<(), AtError> {
        self.restarts += 1;
        Ok(())
    }
}

/// In-memory stream: writes are captured, reads come from `inbound` in
/// 16-byte pulls.
#[derive(Default)]
pub struct MemoryStream {
    pub written: Vec<u8>,
    pub inbound: VecDeque<u8>,
    pub(crate) buffered: Vec<u8>,
    pub closed: bool,
    pub short_write: bool,
    pub connects: u32,
}

impl ByteStream for MemoryStream {
    fn connect(&mut self, _host: &str, _port: u16) -> bool {
        self.connects += 1;
        self.closed = false;
        true
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        if self.short_write || self.closed {
            return 0;
        }
        self.written.extend_from_slice(buf);
        buf.len()
    }

    fn available(&mut self) -> usize {
        if self.buffered.is_empty() {
            let n = self.inbound.len().min(16);
            self.buffered.extend(self.inbound.drain(..n));
        }
        self.buffered.len()
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.buffered.len());
        buf[..n].copy_from_slice(&self.buffered[..n]);
        self.buffered.drain(..n);
        n
    }

    fn stop(&mut self) {
        self.closed = true;
        self.buffered.clear();
    }

    fn connected(&self) -> bool {
        !self.closed
    }
}

thread_local! {
    static CAPTURED: RefCell<Option<Vec<String>>> = RefCell::new(None);
}

/// Logger that records lines only on threads inside [`captured_logs`].
struct CaptureLogger;

impl log::Log for CaptureLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        CAPTURED.with(|captured| {
            if let Some(lines) = captured.borrow_mut().as_mut() {
                lines.push(format!("{} {}", record.level(), record.args()));
            }
        });
    }

    fn flush(&self) {}
}

static CAPTURE_LOGGER: CaptureLogger = CaptureLogger;

/// Info-and-above log lines emitted by the current thread while running `f`.
pub fn captured_logs(f: impl FnOnce()) -> Vec<String> {
    let _ = log::set_logger(&CAPTURE_LOGGER);
    log::set_max_level(log::LevelFilter::Info);
    CAPTURED.with(|captured| *captured.borrow_mut() = Some(Vec::new()));
    f();
    CAPTURED.with(|captured| captured.borrow_mut().take().unwrap_or_default())
}
