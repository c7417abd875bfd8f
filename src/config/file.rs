//! JSON settings file for host builds.
//!
//! Looked up at `$FIELDLINK_SETTINGS`, falling back to
//! `~/.fieldlink/settings.json`. Every field is optional; a missing file
//! means defaults. Durations are given in milliseconds.
//!
//! ```json
//! {
//!   "broker": { "host": "10.0.0.5", "port": 1883 },
//!   "connectivity": { "wifi_strong_dbm": -65, "probe_interval_ms": 5000 },
//!   "at": { "command_ms": 5000, "registration_attempts": 10 },
//!   "status_port": 8080,
//!   "host": { "modem_port": "/dev/ttyUSB0", "wifi_rssi": -55 }
//! }
//! ```

use super::settings::Settings;
use super::ConfigError;
use log::{debug, info};
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the settings path.
pub const SETTINGS_ENV: &str = "FIELDLINK_SETTINGS";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SettingsFile {
    broker: BrokerSection,
    connectivity: ConnectivitySection,
    at: AtSection,
    status_port: Option<u16>,
    host: HostOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct BrokerSection {
    host: Option<String>,
    port: Option<u16>,
    client_id: Option<String>,
    publish_topic: Option<String>,
    subscribe_topic: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConnectivitySection {
    wifi_strong_dbm: Option<i32>,
    cellular_strong_csq: Option<i32>,
    probe_interval_ms: Option<u64>,
    cycle_delay_ms: Option<u64>,
    wifi_probe_budget_ms: Option<u64>,
    wifi_probe_step_ms: Option<u64>,
    publish_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct AtSection {
    command_ms: Option<u64>,
    registration_attempts: Option<u32>,
    registration_interval_ms: Option<u64>,
    connect_budget_ms: Option<u64>,
    tcp_open_ms: Option<u64>,
    send_ack_ms: Option<u64>,
}

/// Host-only knobs that have no meaning on the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostOptions {
    /// Modem serial device; auto-detected when absent.
    pub modem_port: Option<String>,
    pub modem_baud: Option<u32>,
    /// RSSI reported by the host WLAN stand-in; `None` means WLAN unusable.
    pub wifi_rssi: Option<i32>,
}

fn ms(value: Option<u64>, slot: &mut Duration) {
    if let Some(v) = value {
        *slot = Duration::from_millis(v);
    }
}

fn set<T>(value: Option<T>, slot: &mut T) {
    if let Some(v) = value {
        *slot = v;
    }
}

impl SettingsFile {
    fn apply(self, settings: &mut Settings) {
        let b = &mut settings.broker;
        set(self.broker.host, &mut b.host);
        set(self.broker.port, &mut b.port);
        set(self.broker.client_id, &mut b.client_id);
        set(self.broker.publish_topic, &mut b.publish_topic);
        set(self.broker.subscribe_topic, &mut b.subscribe_topic);

        let c = &mut settings.connectivity;
        set(self.connectivity.wifi_strong_dbm, &mut c.wifi_strong_dbm);
        set(self.connectivity.cellular_strong_csq, &mut c.cellular_strong_csq);
        ms(self.connectivity.probe_interval_ms, &mut c.probe_interval);
        ms(self.connectivity.cycle_delay_ms, &mut c.cycle_delay);
        ms(self.connectivity.wifi_probe_budget_ms, &mut c.wifi_probe.budget);
        ms(self.connectivity.wifi_probe_step_ms, &mut c.wifi_probe.step);
        ms(self.connectivity.publish_interval_ms, &mut c.publish_interval);

        let a = &mut settings.at;
        ms(self.at.command_ms, &mut a.command);
        set(self.at.registration_attempts, &mut a.registration_attempts);
        ms(self.at.registration_interval_ms, &mut a.registration_interval);
        ms(self.at.connect_budget_ms, &mut a.connect_budget);
        ms(self.at.tcp_open_ms, &mut a.tcp_open);
        ms(self.at.send_ack_ms, &mut a.send_ack);

        if self.status_port.is_some() {
            settings.status_port = self.status_port;
        }
    }
}

/// Resolve the settings path.
pub fn default_settings_path() -> io::Result<PathBuf> {
    if let Ok(path) = std::env::var(SETTINGS_ENV) {
        return Ok(PathBuf::from(path));
    }
    let home = std::env::var("HOME")
        .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "HOME not set"))?;
    Ok(PathBuf::from(home).join(".fieldlink").join("settings.json"))
}

/// Parse settings from JSON text on top of the defaults.
pub fn parse_settings(text: &str) -> Result<(Settings, HostOptions), ConfigError> {
    let file: SettingsFile =
        serde_json::from_str(text).map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;
    let host = file.host.clone();
    let mut settings = Settings::default();
    file.apply(&mut settings);
    settings.validate()?;
    Ok((settings, host))
}

/// Load settings from `path`. A missing file yields defaults.
pub fn load_settings_from(path: &Path) -> Result<(Settings, HostOptions), ConfigError> {
    match fs::read_to_string(path) {
        Ok(text) => {
            let loaded = parse_settings(&text)?;
            info!("Loaded settings from {:?}", path);
            Ok(loaded)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("No settings file at {:?}, using defaults", path);
            Ok((Settings::default(), HostOptions::default()))
        }
        Err(e) => Err(ConfigError::Io(e)),
    }
}

/// Load settings from the default path.
pub fn load_settings() -> Result<(Settings, HostOptions), ConfigError> {
    let path = default_settings_path()?;
    load_settings_from(&path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::unique_temp_path;

    #[test]
    fn test_empty_object_gives_defaults() {
        let (settings, host) = parse_settings("{}").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(host, HostOptions::default());
    }

    #[test]
    fn test_overrides_apply() {
        let (settings, host) = parse_settings(
            r#"{
                "broker": { "host": "10.0.0.5", "port": 8883 },
                "connectivity": { "wifi_strong_dbm": -65, "probe_interval_ms": 2500 },
                "at": { "registration_attempts": 4 },
                "status_port": 9090,
                "host": { "modem_port": "/dev/ttyUSB3", "wifi_rssi": -58 }
            }"#,
        )
        .unwrap();

        assert_eq!(settings.broker.host, "10.0.0.5");
        assert_eq!(settings.broker.port, 8883);
        assert_eq!(settings.connectivity.wifi_strong_dbm, -65);
        assert_eq!(
            settings.connectivity.probe_interval,
            Duration::from_millis(2500)
        );
        assert_eq!(settings.at.registration_attempts, 4);
        assert_eq!(settings.status_port, Some(9090));
        assert_eq!(host.modem_port.as_deref(), Some("/dev/ttyUSB3"));
        assert_eq!(host.wifi_rssi, Some(-58));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(matches!(
            parse_settings(r#"{ "brokr": {} }"#),
            Err(ConfigError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            parse_settings(r#"{ "connectivity": { "cellular_strong_csq": 50 } }"#),
            Err(ConfigError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_default() {
        let path = unique_temp_path("settings", "json");
        let (settings, _) = load_settings_from(&path).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_from_file() {
        let path = unique_temp_path("settings", "json");
        fs::write(&path, r#"{ "broker": { "client_id": "pump-7" } }"#).unwrap();

        let (settings, _) = load_settings_from(&path).unwrap();
        assert_eq!(settings.broker.client_id, "pump-7");

        let _ = fs::remove_file(&path);
    }
}
