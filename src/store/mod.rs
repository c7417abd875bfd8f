//! Persistent credential records.
//!
//! A store holds named records of plain key/string pairs with no versioning.
//! A record that was never saved loads as empty. The [`CredentialAdapter`]
//! layers typed credentials and change flags on top.
//!
//! # Components
//!
//! - [`memory`] - in-memory store (tests, demos)
//! - [`file`] - JSON file store (host only)
//! - [`nvs`] - ESP32 NVS store
//! - [`adapter`] - typed access and change signalling

pub mod adapter;
#[cfg(not(target_os = "espidf"))]
pub mod file;
pub mod memory;
#[cfg(feature = "esp32")]
pub mod nvs;

use std::collections::BTreeMap;
use std::fmt;

pub use adapter::CredentialAdapter;
#[cfg(not(target_os = "espidf"))]
pub use file::JsonFileStore;
pub use memory::MemoryStore;
#[cfg(feature = "esp32")]
pub use nvs::NvsStore;

/// One named record.
pub type Record = BTreeMap<String, String>;

/// Backend for credential records.
pub trait CredentialStore: Send {
    /// Load a record; a missing record is empty.
    fn load(&self, namespace: &str) -> Result<Record, StoreError>;

    /// Replace a record.
    fn save(&mut self, namespace: &str, record: &Record) -> Result<(), StoreError>;
}

/// Store errors.
#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    /// Stored data could not be decoded.
    Corrupt(String),
    /// Backend-specific failure (e.g. NVS).
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "store I/O error: {}", e),
            Self::Corrupt(msg) => write!(f, "stored data corrupt: {}", msg),
            Self::Backend(msg) => write!(f, "store backend error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
