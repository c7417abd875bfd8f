//! WLAN station adapters.
//!
//! Both implement [`crate::probe::WifiLink`]:
//!
//! - [`EspWifiLink`] - ESP-IDF WiFi driver, non-blocking association (ESP32 only)
//! - [`HostWifi`] - stand-in for host builds, where the OS owns the network

#[cfg(feature = "esp32")]
mod esp;
mod host;

#[cfg(feature = "esp32")]
pub use esp::EspWifiLink;
pub use host::HostWifi;

/// Errors that can occur during WiFi operations.
#[derive(Debug)]
pub enum WifiError {
    /// SSID does not fit the driver's configuration.
    InvalidSsid,
    /// Password does not fit the driver's configuration.
    InvalidPassword,
    /// Association could not be started.
    ConnectionFailed(String),
    /// Driver-level failure.
    Driver(String),
}

#[cfg(feature = "esp32")]
impl From<esp_idf_sys::EspError> for WifiError {
    fn from(e: esp_idf_sys::EspError) -> Self {
        Self::Driver(format!("{:?}", e))
    }
}

impl std::fmt::Display for WifiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSsid => write!(f, "invalid SSID"),
            Self::InvalidPassword => write!(f, "invalid password"),
            Self::ConnectionFailed(e) => write!(f, "connection failed: {}", e),
            Self::Driver(e) => write!(f, "driver error: {}", e),
        }
    }
}

impl std::error::Error for WifiError {}
