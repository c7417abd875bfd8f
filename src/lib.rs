//! FieldLink ESP32 connectivity library.
//!
//! Keeps a field node reachable over WLAN or a GSM/GPRS modem and drives one
//! broker session across transport switches. Everything outside the
//! `esp32`-gated adapters builds and tests on the host.

pub mod at;
pub mod config;
pub mod orchestrator;
pub mod probe;
pub mod provisioning;
pub mod session;
pub mod state;
pub mod status_server;
pub mod store;
pub mod stream;
pub mod timing;
pub mod wifi;
pub mod worker;

#[cfg(test)]
mod testing;

// Re-export commonly used items
pub use at::{AtError, AtTransport, LinkPhase, SerialPort};
pub use config::{
    AtTimeouts, BrokerConfig, CellularCredentials, ConfigError, ConnectivityConfig,
    CredentialField, Settings, WifiCredentials,
};
pub use orchestrator::{select_transport, CycleOutcome, Orchestrator};
pub use probe::{CellularLink, SignalResult, WifiLink};
pub use provisioning::{ProvisionError, Provisioning};
pub use session::{LineSession, PublishOutcome, SessionLayer, SessionManager, SessionPublisher};
pub use state::{ActiveTransport, ConnectivityState, StateHandle};
pub use status_server::{LinkStats, StatusServer, DEFAULT_STATUS_PORT};
pub use store::{CredentialAdapter, CredentialStore, StoreError};
pub use stream::{ByteStream, TcpClient};
pub use timing::{Pacer, Watchdog};
pub use worker::{publish_channel, ConnectivityWorker, Links, PublishRequest};
