//! HTTP status endpoint for field diagnostics.
//!
//! Serves `/status` with the connectivity snapshot and link counters as JSON.
//! Uses `tiny_http`, which works on both host and ESP32 (via std::net). The
//! server only reads; it never touches the transports.
//!
//! # Example Response
//!
//! ```json
//! {
//!   "uptime_secs": 3600,
//!   "transport": "WiFi",
//!   "wifi_rssi": -58,
//!   "cellular_csq": 99,
//!   "signal_bars": 4,
//!   "session_connected": true,
//!   "transport_switches": 2,
//!   "publishes": { "ok": 40, "failed": 1 },
//!   "session_opens": 3,
//!   "rx_dropped": 0
//! }
//! ```

use crate::state::{ConnectivityState, StateHandle};
use log::{error, info, warn};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tiny_http::{Header, Method, Response, Server};

/// Default port for the status server.
pub const DEFAULT_STATUS_PORT: u16 = 8080;

/// Counters updated by the connectivity worker.
#[derive(Debug)]
pub struct LinkStats {
    start_time: Instant,
    pub publishes_ok: AtomicU64,
    pub publishes_failed: AtomicU64,
    pub session_opens: AtomicU64,
    /// Inbound cellular bytes dropped on ring buffer overflow.
    pub rx_dropped: AtomicU64,
}

impl LinkStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            publishes_ok: AtomicU64::new(0),
            publishes_failed: AtomicU64::new(0),
            session_opens: AtomicU64::new(0),
            rx_dropped: AtomicU64::new(0),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn record_publish(&self, ok: bool) {
        let counter = if ok {
            &self.publishes_ok
        } else {
            &self.publishes_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_open(&self) {
        self.session_opens.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for LinkStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Render the snapshot and counters as a JSON object.
pub fn status_json(state: &ConnectivityState, stats: &LinkStats) -> String {
    format!(
        r#"{{"uptime_secs":{},"transport":"{}","wifi_rssi":{},"cellular_csq":{},"signal_bars":{},"session_connected":{},"transport_switches":{},"publishes":{{"ok":{},"failed":{}}},"session_opens":{},"rx_dropped":{}}}"#,
        stats.uptime_secs(),
        state.active_transport,
        state.wifi_signal,
        state.cellular_signal,
        state.signal_bars(),
        state.session_connected,
        state.transport_switches,
        stats.publishes_ok.load(Ordering::Relaxed),
        stats.publishes_failed.load(Ordering::Relaxed),
        stats.session_opens.load(Ordering::Relaxed),
        stats.rx_dropped.load(Ordering::Relaxed),
    )
}

/// HTTP status server.
///
/// Runs in a background thread. Drop it to stop the server.
pub struct StatusServer {
    handle: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl StatusServer {
    /// Start serving on `bind_addr:port` (`None` binds 0.0.0.0).
    pub fn start(
        bind_addr: Option<IpAddr>,
        port: u16,
        state: StateHandle,
        stats: Arc<LinkStats>,
    ) -> Result<Self, std::io::Error> {
        let addr = match bind_addr {
            Some(ip) => format!("{}:{}", ip, port),
            None => format!("0.0.0.0:{}", port),
        };

        let server = Server::http(&addr)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::AddrInUse, format!("{}", e)))?;

        info!("Status server listening on http://{}/status", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let handle = thread::Builder::new()
            .name("status-http".to_string())
            .spawn(move || Self::run_server(server, state, stats, shutdown_clone))?;

        Ok(Self {
            handle: Some(handle),
            shutdown,
        })
    }

    fn run_server(server: Server, state: StateHandle, stats: Arc<LinkStats>, shutdown: Arc<AtomicBool>) {
        let content_type = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).ok();
        let allow_get = Header::from_bytes(&b"Allow"[..], &b"GET"[..]).ok();

        loop {
            if shutdown.load(Ordering::Acquire) {
                info!("Status server shutting down");
                break;
            }

            let request = match server.recv_timeout(Duration::from_millis(100)) {
                Ok(Some(request)) => request,
                Ok(None) => continue,
                Err(e) => {
                    error!("Status server error: {}", e);
                    break;
                }
            };

            if request.method() != &Method::Get {
                let mut response = Response::from_string("Method Not Allowed").with_status_code(405);
                if let Some(header) = allow_get.clone() {
                    response = response.with_header(header);
                }
                let _ = request.respond(response);
                continue;
            }

            let result = match request.url() {
                "/status" | "/status/" => {
                    let json = status_json(&state.snapshot(), &stats);
                    let mut response = Response::from_string(json).with_status_code(200);
                    if let Some(header) = content_type.clone() {
                        response = response.with_header(header);
                    }
                    request.respond(response)
                }
                _ => request.respond(Response::from_string("Not Found").with_status_code(404)),
            };
            if let Err(e) = result {
                warn!("Failed to send status response: {}", e);
            }
        }
    }

    /// Stop the server. May take up to one poll interval.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatusServer {
    fn drop(&mut self) {
        self.stop();
    }
}
