//! Shared connectivity state.
//!
//! One [`ConnectivityState`] exists per node, owned behind a cloneable
//! [`StateHandle`]. The orchestrator writes transport and signal fields, the
//! session layer writes `session_connected`, and everyone else reads
//! snapshots.
//!
//! The handle enforces `active_transport == None => !session_connected` on
//! every write.

use crate::probe::SignalResult;
use log::{debug, info, warn};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// RSSI sentinel when WLAN was not measured.
pub const WIFI_SIGNAL_UNKNOWN: i32 = -100;

/// CSQ sentinel when cellular was not measured.
pub const CELLULAR_SIGNAL_UNKNOWN: i32 = 99;

/// Transport carrying the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActiveTransport {
    None,
    Wifi,
    Cellular,
}

impl ActiveTransport {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Wifi => "WiFi",
            Self::Cellular => "Cellular",
        }
    }
}

impl fmt::Display for ActiveTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of node reachability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityState {
    pub active_transport: ActiveTransport,
    /// dBm, [`WIFI_SIGNAL_UNKNOWN`] when not measured.
    pub wifi_signal: i32,
    /// 0..=31, [`CELLULAR_SIGNAL_UNKNOWN`] when not measured.
    pub cellular_signal: i32,
    pub session_connected: bool,
    /// Session must re-handshake; consumed by the session layer.
    pub force_resync: bool,
    pub last_probe_at: Option<Instant>,
    /// Number of transport identity changes since boot.
    pub transport_switches: u32,
}

impl Default for ConnectivityState {
    fn default() -> Self {
        Self {
            active_transport: ActiveTransport::None,
            wifi_signal: WIFI_SIGNAL_UNKNOWN,
            cellular_signal: CELLULAR_SIGNAL_UNKNOWN,
            session_connected: false,
            force_resync: false,
            last_probe_at: None,
            transport_switches: 0,
        }
    }
}

impl ConnectivityState {
    /// Signal of the active transport as 0..=5 bars (0 when none).
    pub fn signal_bars(&self) -> u8 {
        match self.active_transport {
            ActiveTransport::None => 0,
            ActiveTransport::Wifi => signal_level(self.wifi_signal, WIFI_SIGNAL_UNKNOWN, -70),
            ActiveTransport::Cellular => signal_level(self.cellular_signal, 0, 31),
        }
    }
}

/// Map `value` in `min..=max` onto 0..=5 bars, clamping outside the range.
pub fn signal_level(value: i32, min: i32, max: i32) -> u8 {
    if value <= min {
        return 0;
    }
    if value >= max {
        return 5;
    }
    ((i64::from(value) - i64::from(min)) * 5 / (i64::from(max) - i64::from(min))) as u8
}

/// Cloneable handle to the single state instance.
#[derive(Debug, Clone, Default)]
pub struct StateHandle {
    inner: Arc<RwLock<ConnectivityState>>,
}

impl StateHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, ConnectivityState> {
        self.inner.read().unwrap_or_else(|poisoned| {
            warn!("Connectivity state lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, ConnectivityState> {
        self.inner.write().unwrap_or_else(|poisoned| {
            warn!("Connectivity state lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn snapshot(&self) -> ConnectivityState {
        *self.read()
    }

    pub fn active_transport(&self) -> ActiveTransport {
        self.read().active_transport
    }

    /// Apply a transport selection.
    ///
    /// A change drops the session and requests a resync. Returns whether the
    /// transport changed.
    pub fn select(&self, transport: ActiveTransport) -> bool {
        let mut state = self.write();
        if state.active_transport == transport {
            return false;
        }
        info!(
            "Transport change: {} -> {}",
            state.active_transport, transport
        );
        state.active_transport = transport;
        state.session_connected = false;
        state.force_resync = true;
        state.transport_switches = state.transport_switches.saturating_add(1);
        true
    }

    /// Store probe results. A transport that was not probed reads as unknown.
    pub fn record_probe(&self, wifi: SignalResult, cellular: Option<SignalResult>, at: Instant) {
        let mut state = self.write();
        state.wifi_signal = wifi.value().unwrap_or(WIFI_SIGNAL_UNKNOWN);
        state.cellular_signal = cellular
            .and_then(SignalResult::value)
            .unwrap_or(CELLULAR_SIGNAL_UNKNOWN);
        state.last_probe_at = Some(at);
    }

    /// Drop to `None` after a credential change.
    pub fn reset(&self) {
        let mut state = self.write();
        if state.active_transport != ActiveTransport::None {
            state.transport_switches = state.transport_switches.saturating_add(1);
        }
        state.active_transport = ActiveTransport::None;
        state.session_connected = false;
        state.force_resync = true;
        state.wifi_signal = WIFI_SIGNAL_UNKNOWN;
        state.cellular_signal = CELLULAR_SIGNAL_UNKNOWN;
        state.last_probe_at = None;
    }

    /// Record the session state. Refuses `true` while no transport is active.
    pub fn set_session_connected(&self, connected: bool) -> bool {
        let mut state = self.write();
        if connected && state.active_transport == ActiveTransport::None {
            debug!("Ignoring session up with no active transport");
            state.session_connected = false;
            return false;
        }
        state.session_connected = connected;
        true
    }

    /// Consume the resync request.
    pub fn take_force_resync(&self) -> bool {
        std::mem::take(&mut self.write().force_resync)
    }
}
