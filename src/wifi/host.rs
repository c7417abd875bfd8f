//! WLAN stand-in for host builds.
//!
//! The host's own network stack carries traffic, so "WLAN" here simply reports
//! a configured RSSI. Leaving the RSSI unset makes WLAN unusable, which forces
//! the cellular path for bench testing with a USB modem.

use crate::config::WifiCredentials;
use crate::probe::WifiLink;
use crate::wifi::WifiError;
use log::debug;

#[derive(Debug, Clone, Default)]
pub struct HostWifi {
    rssi: Option<i32>,
    associated: bool,
}

impl HostWifi {
    pub fn new(rssi: Option<i32>) -> Self {
        Self {
            rssi,
            associated: false,
        }
    }
}

impl WifiLink for HostWifi {
    fn begin(&mut self, credentials: &WifiCredentials) -> Result<(), WifiError> {
        debug!("Host WiFi: pretending to join '{}'", credentials.ssid);
        self.associated = self.rssi.is_some();
        Ok(())
    }

    fn is_associated(&self) -> bool {
        self.associated
    }

    fn rssi(&self) -> Option<i32> {
        self.rssi.filter(|_| self.associated)
    }

    fn disconnect(&mut self) {
        self.associated = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WifiProbeConfig;
    use crate::probe::{probe_wifi, SignalResult};
    use crate::testing::manual_pacer;

    #[test]
    fn test_reports_configured_rssi() {
        let mut wifi = HostWifi::new(Some(-55));
        let (pacer, _, _) = manual_pacer();
        let creds = WifiCredentials::new("bench", "bench-pass");

        assert_eq!(
            probe_wifi(&mut wifi, &creds, &WifiProbeConfig::default(), &pacer),
            SignalResult::Measured(-55)
        );
        wifi.disconnect();
        assert_eq!(wifi.rssi(), None);
    }

    #[test]
    fn test_unset_rssi_never_associates() {
        let mut wifi = HostWifi::new(None);
        let (pacer, _, _) = manual_pacer();
        let creds = WifiCredentials::new("bench", "bench-pass");

        assert_eq!(
            probe_wifi(&mut wifi, &creds, &WifiProbeConfig::default(), &pacer),
            SignalResult::Unavailable
        );
    }
}
