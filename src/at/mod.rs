//! AT-command transport to the cellular modem.
//!
//! # Components
//!
//! - [`serial`] - port seam (host `serialport`, ESP32 UART)
//! - [`response`] - bounded response scanner and line parsers
//! - [`ring`] - receive ring buffer
//! - [`channel`] - bounded command/response exchange
//! - [`transport`] - the virtual socket built on all of the above

pub mod channel;
pub mod response;
pub mod ring;
pub mod serial;
pub mod transport;
#[cfg(feature = "esp32")]
mod uart;

pub use channel::{AtChannel, AtError};
pub use response::{Registration, ResponseBuffer, RxHeader};
pub use ring::{RingBuffer, DEFAULT_RX_CAPACITY};
pub use serial::{SerialPort, Unplugged, DEFAULT_BAUD};
#[cfg(not(target_os = "espidf"))]
pub use serial::{find_modem_port, HostSerial};
pub use transport::{AtTransport, LinkPhase};
#[cfg(feature = "esp32")]
pub use uart::UartSerial;
