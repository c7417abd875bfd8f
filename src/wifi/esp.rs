//! ESP-IDF WLAN station.
//!
//! Association is started without blocking; the probe polls
//! [`WifiLink::is_associated`] in short steps so the watchdog keeps being fed.

use super::WifiError;
use crate::config::WifiCredentials;
use crate::probe::WifiLink;
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration, EspWifi};
use esp_idf_sys::EspError;
use log::{debug, info, warn};

/// WLAN station over the ESP-IDF driver.
pub struct EspWifiLink<'a> {
    wifi: EspWifi<'a>,
}

impl<'a> EspWifiLink<'a> {
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: Option<EspDefaultNvsPartition>,
    ) -> Result<Self, EspError> {
        let wifi = EspWifi::new(modem, sysloop, nvs)?;
        Ok(Self { wifi })
    }

    /// IP address of the station interface, once DHCP has completed.
    pub fn ip(&self) -> Option<String> {
        if !self.is_associated() {
            return None;
        }
        self.wifi
            .sta_netif()
            .get_ip_info()
            .ok()
            .map(|info| format!("{}", info.ip))
    }
}

impl WifiLink for EspWifiLink<'_> {
    fn begin(&mut self, credentials: &WifiCredentials) -> Result<(), WifiError> {
        info!("Connecting to WiFi: {}", credentials.ssid);

        let config = Configuration::Client(ClientConfiguration {
            ssid: credentials
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| WifiError::InvalidSsid)?,
            password: credentials
                .password
                .as_str()
                .try_into()
                .map_err(|_| WifiError::InvalidPassword)?,
            auth_method: AuthMethod::WPA2Personal,
            ..Default::default()
        });

        self.wifi.set_configuration(&config)?;
        if !self.wifi.is_started()? {
            self.wifi.start()?;
        }
        self.wifi
            .connect()
            .map_err(|e| WifiError::ConnectionFailed(format!("{:?}", e)))?;
        Ok(())
    }

    fn is_associated(&self) -> bool {
        // usable only once DHCP has brought the interface up
        self.wifi.is_connected().unwrap_or(false)
            && self.wifi.sta_netif().is_up().unwrap_or(false)
    }

    fn rssi(&self) -> Option<i32> {
        let mut record = esp_idf_sys::wifi_ap_record_t::default();
        let result = unsafe { esp_idf_sys::esp_wifi_sta_get_ap_info(&mut record) };
        if result == esp_idf_sys::ESP_OK as i32 {
            Some(i32::from(record.rssi))
        } else {
            debug!("esp_wifi_sta_get_ap_info failed: {}", result);
            None
        }
    }

    fn disconnect(&mut self) {
        info!("Disconnecting from WiFi");
        if let Err(e) = self.wifi.disconnect() {
            warn!("WiFi disconnect failed: {:?}", e);
        }
    }
}
