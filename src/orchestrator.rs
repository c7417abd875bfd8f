//! Transport selection.
//!
//! Each cycle the orchestrator first applies pending credential changes, then,
//! when a probe is due, probes WLAN (and cellular only if WLAN is unusable) and
//! selects a transport by fixed priority:
//!
//! 1. WLAN usable and stronger than the WLAN threshold
//! 2. cellular usable and stronger than the CSQ threshold
//! 3. WLAN usable
//! 4. cellular usable
//! 5. none
//!
//! There is no dwell time: a selection takes effect on the cycle it is made.

use crate::config::{ConnectivityConfig, WifiCredentials};
use crate::probe::{probe_wifi, CellularLink, SignalResult, WifiLink};
use crate::state::{ActiveTransport, StateHandle};
use crate::store::CredentialAdapter;
use crate::timing::Pacer;
use log::{debug, info, warn};

/// Which priority rule produced a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionRule {
    StrongWifi,
    StrongCellular,
    FallbackWifi,
    FallbackCellular,
    NoneAvailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub transport: ActiveTransport,
    pub rule: SelectionRule,
}

/// Apply the priority rules to a pair of probe results.
pub fn select_transport(
    wifi: SignalResult,
    cellular: SignalResult,
    config: &ConnectivityConfig,
) -> Selection {
    let (transport, rule) = match (wifi, cellular) {
        (SignalResult::Measured(rssi), _) if rssi > config.wifi_strong_dbm => {
            (ActiveTransport::Wifi, SelectionRule::StrongWifi)
        }
        (_, SignalResult::Measured(csq)) if csq > config.cellular_strong_csq => {
            (ActiveTransport::Cellular, SelectionRule::StrongCellular)
        }
        (SignalResult::Measured(_), _) => (ActiveTransport::Wifi, SelectionRule::FallbackWifi),
        (_, SignalResult::Measured(_)) => {
            (ActiveTransport::Cellular, SelectionRule::FallbackCellular)
        }
        _ => (ActiveTransport::None, SelectionRule::NoneAvailable),
    };
    Selection { transport, rule }
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Credentials changed; state dropped to `None` and probing waits a cycle.
    CredentialsReset { wifi: bool, cellular: bool },
    /// Probes ran and a selection was applied.
    Probed { selection: Selection, changed: bool },
    /// Nothing due.
    Idle,
}

pub struct Orchestrator {
    config: ConnectivityConfig,
    state: StateHandle,
    credentials: CredentialAdapter,
    pacer: Pacer,
    wifi_credentials: WifiCredentials,
}

impl Orchestrator {
    pub fn new(
        config: ConnectivityConfig,
        state: StateHandle,
        credentials: CredentialAdapter,
        pacer: Pacer,
    ) -> Self {
        let wifi_credentials = credentials.load_wifi().unwrap_or_else(|e| {
            warn!("Could not load WiFi credentials: {}", e);
            WifiCredentials::default()
        });
        Self {
            config,
            state,
            credentials,
            pacer,
            wifi_credentials,
        }
    }

    pub fn state(&self) -> &StateHandle {
        &self.state
    }

    pub fn config(&self) -> &ConnectivityConfig {
        &self.config
    }

    /// One evaluation step. Feeds the watchdog once on entry.
    pub fn run_cycle(
        &mut self,
        wifi: &mut dyn WifiLink,
        cellular: &mut dyn CellularLink,
    ) -> CycleOutcome {
        self.pacer.feed();

        if let Some(outcome) = self.apply_credential_changes(wifi, cellular) {
            return outcome;
        }
        if !self.probe_due() {
            return CycleOutcome::Idle;
        }
        self.probe_and_select(wifi, cellular)
    }

    fn probe_due(&self) -> bool {
        let state = self.state.snapshot();
        if state.active_transport == ActiveTransport::None {
            return true;
        }
        match state.last_probe_at {
            Some(at) => self.pacer.now().saturating_duration_since(at) >= self.config.probe_interval,
            None => true,
        }
    }

    fn apply_credential_changes(
        &mut self,
        wifi: &mut dyn WifiLink,
        cellular: &mut dyn CellularLink,
    ) -> Option<CycleOutcome> {
        let wifi_changed = self.credentials.take_wifi_changed();
        let cellular_changed = self.credentials.take_cellular_changed();
        if !wifi_changed && !cellular_changed {
            return None;
        }

        if wifi_changed {
            info!("WiFi credentials changed, disassociating");
            match self.credentials.load_wifi() {
                Ok(creds) => self.wifi_credentials = creds,
                Err(e) => warn!("Could not reload WiFi credentials: {}", e),
            }
            wifi.disconnect();
        }

        if cellular_changed {
            info!("Cellular credentials changed, restarting modem");
            match self.credentials.load_cellular() {
                Ok(creds) => cellular.set_credentials(creds),
                Err(e) => warn!("Could not reload cellular credentials: {}", e),
            }
            if let Err(e) = cellular.restart() {
                warn!("Modem restart failed: {}", e);
            }
        }

        self.state.reset();
        Some(CycleOutcome::CredentialsReset {
            wifi: wifi_changed,
            cellular: cellular_changed,
        })
    }

    fn probe_and_select(
        &mut self,
        wifi: &mut dyn WifiLink,
        cellular: &mut dyn CellularLink,
    ) -> CycleOutcome {
        let wifi_result = probe_wifi(
            wifi,
            &self.wifi_credentials,
            &self.config.wifi_probe,
            &self.pacer,
        );
        let cellular_result = if wifi_result.is_usable() {
            None
        } else {
            Some(cellular.probe_cellular())
        };
        self.pacer.feed();

        self.state
            .record_probe(wifi_result, cellular_result, self.pacer.now());
        let selection = select_transport(
            wifi_result,
            cellular_result.unwrap_or(SignalResult::Unavailable),
            &self.config,
        );
        debug!(
            "Probe: wifi={:?} cellular={:?} -> {} ({:?})",
            wifi_result, cellular_result, selection.transport, selection.rule
        );
        let changed = self.state.select(selection.transport);
        CycleOutcome::Probed { selection, changed }
    }
}
