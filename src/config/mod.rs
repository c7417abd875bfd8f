//! Node configuration.
//!
//! # Components
//!
//! - [`credentials`] - WLAN/APN credential types and the provisionable field enum
//! - [`settings`] - thresholds, timeouts and broker settings with validation
//! - [`file`] - optional JSON settings file (host only)

pub mod credentials;
#[cfg(not(target_os = "espidf"))]
pub mod file;
pub mod settings;

use std::fmt;

pub use credentials::{
    display_value, CellularCredentials, CellularField, CredentialField, WifiCredentials,
    WifiField, CELLULAR_NAMESPACE, MAX_CREDENTIAL_LEN, WIFI_NAMESPACE,
};
pub use settings::{
    AtTimeouts, BrokerConfig, ConnectivityConfig, Settings, WifiProbeConfig,
};

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Unrecognized `<namespace>.<key>` field name.
    UnknownField(String),
    /// Required setting is empty.
    Missing(&'static str),
    /// Setting outside its allowed range.
    OutOfRange { name: &'static str, value: String },
    /// Settings file could not be read.
    Io(std::io::Error),
    /// Settings file is not valid.
    InvalidFormat(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownField(name) => write!(f, "unknown credential field: {}", name),
            Self::Missing(name) => write!(f, "{} must not be empty", name),
            Self::OutOfRange { name, value } => write!(f, "{} out of range: {}", name, value),
            Self::Io(e) => write!(f, "settings I/O error: {}", e),
            Self::InvalidFormat(msg) => write!(f, "invalid settings: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
