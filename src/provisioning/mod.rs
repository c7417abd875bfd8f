//! Credential provisioning entry points.
//!
//! Every provisioning front end (BLE GATT on the device, the stdin console on
//! the host) funnels into [`Provisioning::on_write`] with a tagged field and
//! the raw value bytes.
//!
//! # Components
//!
//! - [`console`] - line commands from stdin (host only)
//! - [`ble_service`] - GATT service with one characteristic per field (ESP32 only)

#[cfg(feature = "esp32")]
pub mod ble_service;
pub mod console;

use crate::config::{display_value, CredentialField, MAX_CREDENTIAL_LEN};
use crate::store::StoreError;
use std::fmt;

#[cfg(feature = "esp32")]
pub use ble_service::ProvisioningService;
pub use console::ConsoleCommand;

/// Sink for credential writes.
pub trait Provisioning: Send + Sync {
    /// Validate, persist, and signal a change to one credential field.
    fn on_write(&self, field: CredentialField, value: &[u8]) -> Result<(), ProvisionError>;
}

/// Provisioning errors.
#[derive(Debug)]
pub enum ProvisionError {
    Empty,
    TooLong { len: usize, max: usize },
    InvalidUtf8,
    Store(StoreError),
}

impl fmt::Display for ProvisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "value must not be empty"),
            Self::TooLong { len, max } => {
                write!(f, "value too long: {} bytes (max {})", len, max)
            }
            Self::InvalidUtf8 => write!(f, "value is not valid UTF-8"),
            Self::Store(e) => write!(f, "could not persist value: {}", e),
        }
    }
}

impl std::error::Error for ProvisionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for ProvisionError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// Check a raw value against the boundary rules: 1..=127 bytes of UTF-8.
///
/// The length is checked before decoding so oversized input is never copied.
pub fn validate_value(value: &[u8]) -> Result<&str, ProvisionError> {
    if value.is_empty() {
        return Err(ProvisionError::Empty);
    }
    if value.len() > MAX_CREDENTIAL_LEN {
        return Err(ProvisionError::TooLong {
            len: value.len(),
            max: MAX_CREDENTIAL_LEN,
        });
    }
    std::str::from_utf8(value).map_err(|_| ProvisionError::InvalidUtf8)
}

/// Store a raw characteristic write and return the value to notify
/// subscribers with. Secret fields are acknowledged masked.
pub fn apply_write(
    provisioning: &dyn Provisioning,
    field: CredentialField,
    value: &[u8],
) -> Result<String, ProvisionError> {
    provisioning.on_write(field, value)?;
    let stored = validate_value(value)?;
    Ok(display_value(field, stored))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CellularField, WifiField};
    use crate::store::{CredentialAdapter, MemoryStore};

    #[test]
    fn test_validate_bounds() {
        assert!(matches!(validate_value(b""), Err(ProvisionError::Empty)));
        assert_eq!(validate_value(b"a").unwrap(), "a");
        assert_eq!(validate_value(&[b'k'; 127]).unwrap().len(), 127);
        assert!(matches!(
            validate_value(&[b'k'; 128]),
            Err(ProvisionError::TooLong { len: 128, max: 127 })
        ));
    }

    #[test]
    fn test_validate_rejects_invalid_utf8() {
        assert!(matches!(
            validate_value(&[0xC3, 0x28]),
            Err(ProvisionError::InvalidUtf8)
        ));
        assert_eq!(validate_value("Café".as_bytes()).unwrap(), "Café");
    }

    // ==================== Write Acknowledgement Tests ====================

    #[test]
    fn test_apply_write_echoes_plain_field() {
        let adapter = CredentialAdapter::new(MemoryStore::new());
        let field = CredentialField::Cellular(CellularField::Apn);

        assert_eq!(apply_write(&adapter, field, b"iot.example").unwrap(), "iot.example");
        assert_eq!(adapter.load_cellular().unwrap().apn, "iot.example");
        assert!(adapter.take_cellular_changed());
    }

    #[test]
    fn test_apply_write_masks_secret_field() {
        let adapter = CredentialAdapter::new(MemoryStore::new());
        let field = CredentialField::Wifi(WifiField::Password);

        assert_eq!(apply_write(&adapter, field, b"hunter22").unwrap(), "****");
        assert_eq!(adapter.load_wifi().unwrap().password, "hunter22");
    }

    #[test]
    fn test_apply_write_rejected_has_nothing_to_notify() {
        let adapter = CredentialAdapter::new(MemoryStore::new());
        let field = CredentialField::Wifi(WifiField::Ssid);

        assert!(matches!(
            apply_write(&adapter, field, b""),
            Err(ProvisionError::Empty)
        ));
        assert!(!adapter.take_wifi_changed());
    }
}
