//! Tunables for the orchestrator, the AT transport and the broker session.

use super::ConfigError;
use std::time::Duration;

/// WLAN RSSI above which WLAN wins outright (dBm).
pub const DEFAULT_WIFI_STRONG_DBM: i32 = -70;

/// CSQ above which cellular wins outright.
pub const DEFAULT_CELLULAR_STRONG_CSQ: i32 = 10;

pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_CYCLE_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_secs(10);

/// Total time allowed for WLAN association during a probe.
pub const DEFAULT_WIFI_PROBE_BUDGET: Duration = Duration::from_secs(6);

/// Association poll step during a WLAN probe.
pub const DEFAULT_WIFI_PROBE_STEP: Duration = Duration::from_millis(200);

pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// WLAN association polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiProbeConfig {
    pub budget: Duration,
    pub step: Duration,
}

impl Default for WifiProbeConfig {
    fn default() -> Self {
        Self {
            budget: DEFAULT_WIFI_PROBE_BUDGET,
            step: DEFAULT_WIFI_PROBE_STEP,
        }
    }
}

/// Transport selection and scheduling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityConfig {
    pub wifi_strong_dbm: i32,
    pub cellular_strong_csq: i32,
    /// Re-probe period while a transport is active.
    pub probe_interval: Duration,
    /// Delay between worker cycles.
    pub cycle_delay: Duration,
    pub wifi_probe: WifiProbeConfig,
    /// Minimum spacing between publishes.
    pub publish_interval: Duration,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            wifi_strong_dbm: DEFAULT_WIFI_STRONG_DBM,
            cellular_strong_csq: DEFAULT_CELLULAR_STRONG_CSQ,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            cycle_delay: DEFAULT_CYCLE_DELAY,
            wifi_probe: WifiProbeConfig::default(),
            publish_interval: DEFAULT_PUBLISH_INTERVAL,
        }
    }
}

impl ConnectivityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(-120..=0).contains(&self.wifi_strong_dbm) {
            return Err(ConfigError::OutOfRange {
                name: "wifi_strong_dbm",
                value: self.wifi_strong_dbm.to_string(),
            });
        }
        if !(0..=31).contains(&self.cellular_strong_csq) {
            return Err(ConfigError::OutOfRange {
                name: "cellular_strong_csq",
                value: self.cellular_strong_csq.to_string(),
            });
        }
        non_zero("probe_interval", self.probe_interval)?;
        non_zero("wifi_probe.budget", self.wifi_probe.budget)?;
        non_zero("wifi_probe.step", self.wifi_probe.step)?;
        if self.wifi_probe.step > self.wifi_probe.budget {
            return Err(ConfigError::OutOfRange {
                name: "wifi_probe.step",
                value: format!("{:?} exceeds budget", self.wifi_probe.step),
            });
        }
        Ok(())
    }
}

/// Per-step limits for the modem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtTimeouts {
    /// Ordinary command round trip.
    pub command: Duration,
    pub registration_attempts: u32,
    pub registration_interval: Duration,
    /// `AT+CGATT=1`.
    pub attach: Duration,
    /// `AT+CIICR`.
    pub bring_up: Duration,
    /// `AT+CIPSTART` until `CONNECT OK`.
    pub tcp_open: Duration,
    /// Whole connect sequence.
    pub connect_budget: Duration,
    pub send_prompt: Duration,
    pub send_ack: Duration,
    /// One `AT+CIPRXGET=2` data fetch.
    pub rx_fetch: Duration,
    pub close: Duration,
    pub shut: Duration,
    /// Wait after `AT+CFUN=1,1` before talking to the modem again.
    pub restart_settle: Duration,
}

impl Default for AtTimeouts {
    fn default() -> Self {
        Self {
            command: Duration::from_secs(5),
            registration_attempts: 10,
            registration_interval: Duration::from_millis(500),
            attach: Duration::from_secs(10),
            bring_up: Duration::from_secs(30),
            tcp_open: Duration::from_secs(20),
            connect_budget: Duration::from_secs(60),
            send_prompt: Duration::from_secs(5),
            send_ack: Duration::from_secs(10),
            rx_fetch: Duration::from_millis(500),
            close: Duration::from_secs(5),
            shut: Duration::from_secs(5),
            restart_settle: Duration::from_secs(3),
        }
    }
}

impl AtTimeouts {
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("at.command", self.command)?;
        non_zero("at.tcp_open", self.tcp_open)?;
        non_zero("at.send_ack", self.send_ack)?;
        non_zero("at.rx_fetch", self.rx_fetch)?;
        if self.registration_attempts == 0 {
            return Err(ConfigError::OutOfRange {
                name: "at.registration_attempts",
                value: "0".to_string(),
            });
        }
        if self.connect_budget < self.command {
            return Err(ConfigError::OutOfRange {
                name: "at.connect_budget",
                value: format!("{:?} is shorter than one command", self.connect_budget),
            });
        }
        Ok(())
    }
}

/// Where the session connects and what it publishes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Topic for telemetry publishes.
    pub publish_topic: String,
    /// Topic the session subscribes to after each handshake.
    pub subscribe_topic: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "broker.hivemq.com".to_string(),
            port: DEFAULT_BROKER_PORT,
            client_id: "fieldlink-node".to_string(),
            publish_topic: "fieldlink/telemetry".to_string(),
            subscribe_topic: "fieldlink/commands".to_string(),
        }
    }
}

impl BrokerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Missing("broker.host"));
        }
        if self.port == 0 {
            return Err(ConfigError::OutOfRange {
                name: "broker.port",
                value: "0".to_string(),
            });
        }
        if self.client_id.is_empty() {
            return Err(ConfigError::Missing("broker.client_id"));
        }
        if self.publish_topic.is_empty() {
            return Err(ConfigError::Missing("broker.publish_topic"));
        }
        Ok(())
    }
}

/// Everything the worker needs, validated together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub connectivity: ConnectivityConfig,
    pub at: AtTimeouts,
    pub broker: BrokerConfig,
    /// Status endpoint port; `None` disables it.
    pub status_port: Option<u16>,
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connectivity.validate()?;
        self.at.validate()?;
        self.broker.validate()
    }
}

fn non_zero(name: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        Err(ConfigError::OutOfRange {
            name,
            value: "0".to_string(),
        })
    } else {
        Ok(())
    }
}
