//! Signal probes for both transports.
//!
//! A probe answers one question: is this transport usable right now, and how
//! strong is it? `Unavailable` is a normal answer, not an error.

use crate::at::AtError;
use crate::config::{CellularCredentials, WifiCredentials, WifiProbeConfig};
use crate::timing::Pacer;
use crate::wifi::WifiError;
use log::{debug, info};

/// Outcome of a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalResult {
    Unavailable,
    /// RSSI in dBm for WLAN, CSQ index for cellular.
    Measured(i32),
}

impl SignalResult {
    pub fn is_usable(self) -> bool {
        matches!(self, Self::Measured(_))
    }

    pub fn value(self) -> Option<i32> {
        match self {
            Self::Measured(v) => Some(v),
            Self::Unavailable => None,
        }
    }
}

/// WLAN station radio.
pub trait WifiLink: Send {
    /// Start associating with `credentials`. Must return without waiting for
    /// association to complete.
    fn begin(&mut self, credentials: &WifiCredentials) -> Result<(), WifiError>;

    fn is_associated(&self) -> bool;

    /// RSSI of the current association, if any.
    fn rssi(&self) -> Option<i32>;

    /// Drop the association; the radio stays powered.
    fn disconnect(&mut self);
}

/// Cellular modem as seen by the orchestrator.
pub trait CellularLink: Send {
    /// Liveness, registration and signal quality.
    fn probe_cellular(&mut self) -> SignalResult;

    /// Credentials for the next data connection.
    fn set_credentials(&mut self, credentials: CellularCredentials);

    /// Full modem reset; the data connection is lost.
    fn restart(&mut self) -> Result<(), AtError>;
}

/// Associate (if needed) and read RSSI within the configured budget.
pub fn probe_wifi(
    link: &mut dyn WifiLink,
    credentials: &WifiCredentials,
    config: &WifiProbeConfig,
    pacer: &Pacer,
) -> SignalResult {
    if !credentials.is_configured() {
        debug!("WiFi probe skipped: no credentials");
        return SignalResult::Unavailable;
    }

    if !link.is_associated() {
        debug!("Associating with '{}'", credentials.ssid);
        if let Err(e) = link.begin(credentials) {
            info!("WiFi association could not start: {}", e);
            return SignalResult::Unavailable;
        }
        let deadline = pacer.deadline(config.budget);
        while !link.is_associated() {
            if pacer.expired(deadline) {
                info!(
                    "WiFi '{}' did not associate within {:?}",
                    credentials.ssid, config.budget
                );
                link.disconnect();
                return SignalResult::Unavailable;
            }
            let step = config.step.min(pacer.remaining(deadline));
            pacer.pause(step);
        }
    }

    match link.rssi() {
        Some(rssi) => {
            debug!("WiFi RSSI {} dBm", rssi);
            SignalResult::Measured(rssi)
        }
        None => SignalResult::Unavailable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{manual_pacer, FakeWifi};
    use crate::timing::Clock;
    use std::time::Duration;

    fn creds() -> WifiCredentials {
        WifiCredentials::new("FieldNet", "hunter22")
    }

    #[test]
    fn test_unconfigured_is_unavailable_without_touching_radio() {
        let mut radio = FakeWifi::in_range(-60);
        let (pacer, _, _) = manual_pacer();

        let result = probe_wifi(
            &mut radio,
            &WifiCredentials::default(),
            &WifiProbeConfig::default(),
            &pacer,
        );

        assert_eq!(result, SignalResult::Unavailable);
        assert_eq!(radio.begins, 0);
    }

    #[test]
    fn test_associates_within_budget() {
        let mut radio = FakeWifi::in_range(-58).associate_after(3);
        let (pacer, clock, _) = manual_pacer();
        let start = clock.now();

        let result = probe_wifi(&mut radio, &creds(), &WifiProbeConfig::default(), &pacer);

        assert_eq!(result, SignalResult::Measured(-58));
        assert_eq!(radio.begins, 1);
        assert!(clock.now() - start <= Duration::from_millis(600));
    }

    #[test]
    fn test_already_associated_skips_begin() {
        let mut radio = FakeWifi::in_range(-72);
        radio.associated = true;
        let (pacer, _, _) = manual_pacer();

        let result = probe_wifi(&mut radio, &creds(), &WifiProbeConfig::default(), &pacer);

        assert_eq!(result, SignalResult::Measured(-72));
        assert_eq!(radio.begins, 0);
    }

    #[test]
    fn test_timeout_disassociates() {
        let mut radio = FakeWifi::out_of_range();
        let (pacer, clock, watchdog) = manual_pacer();
        let start = clock.now();

        let result = probe_wifi(&mut radio, &creds(), &WifiProbeConfig::default(), &pacer);

        assert_eq!(result, SignalResult::Unavailable);
        assert_eq!(radio.disconnects, 1);
        assert_eq!(clock.now() - start, Duration::from_secs(6));
        assert!(watchdog.count() > 0);
    }

    #[test]
    fn test_begin_error_is_unavailable() {
        let mut radio = FakeWifi::in_range(-50);
        radio.fail_begin = true;
        let (pacer, _, _) = manual_pacer();

        assert_eq!(
            probe_wifi(&mut radio, &creds(), &WifiProbeConfig::default(), &pacer),
            SignalResult::Unavailable
        );
    }
}
