//! BLE GATT service for credential provisioning.
//!
//! Lets a phone app such as nRF Connect write WLAN and APN credentials. Each
//! write goes through [`Provisioning::on_write`](super::Provisioning::on_write)
//! exactly like a console `set`, so it is validated, persisted and raises the
//! changed flag. Accepted writes are acknowledged with a notification carrying
//! the stored value (masked for passwords).
//!
//! # GATT Service Structure
//!
//! ```text
//! Service: Credential Provisioning
//! ├── WiFi SSID (Read, Write, Notify)
//! ├── WiFi Password (Write, Notify)
//! ├── APN (Read, Write, Notify)
//! ├── APN User (Read, Write, Notify)
//! └── APN Password (Write, Notify)
//! ```
//!
//! # Security Considerations
//!
//! Values travel as plaintext inside the BLE link. Provision in a physically
//! secure place; passwords are write-only and never readable back.

use super::apply_write;
use crate::config::{CellularField, CredentialField, WifiField};
use crate::store::CredentialAdapter;
use esp32_nimble::utilities::BleUuid;
use esp32_nimble::{uuid128, BLEDevice, BLEError, BLEServer, NimbleProperties};
use log::{info, warn};
use std::sync::Arc;

const PROVISIONING_SERVICE_UUID: BleUuid = uuid128!("4fafc201-1fb5-459e-8fcc-c5c9c331914b");

const WIFI_SSID_CHAR_UUID: BleUuid = uuid128!("beb5483e-36e1-4688-b7f5-ea07361b26a8");
const WIFI_PASSWORD_CHAR_UUID: BleUuid = uuid128!("beb5483e-36e1-4688-b7f5-ea07361b26a9");
const APN_CHAR_UUID: BleUuid = uuid128!("beb5483e-36e1-4688-b7f5-ea07361b26b7");
const APN_USER_CHAR_UUID: BleUuid = uuid128!("beb5483e-36e1-4688-b7f5-ea07361b26b8");
const APN_PASSWORD_CHAR_UUID: BleUuid = uuid128!("beb5483e-36e1-4688-b7f5-ea07361b26b9");

/// BLE advertisement name.
pub const DEVICE_NAME: &str = "FieldLink Provisioner";

fn characteristic_uuid(field: CredentialField) -> BleUuid {
    match field {
        CredentialField::Wifi(WifiField::Ssid) => WIFI_SSID_CHAR_UUID,
        CredentialField::Wifi(WifiField::Password) => WIFI_PASSWORD_CHAR_UUID,
        CredentialField::Cellular(CellularField::Apn) => APN_CHAR_UUID,
        CredentialField::Cellular(CellularField::User) => APN_USER_CHAR_UUID,
        CredentialField::Cellular(CellularField::Password) => APN_PASSWORD_CHAR_UUID,
    }
}

/// Current stored value of a non-secret field.
fn stored_value(adapter: &CredentialAdapter, field: CredentialField) -> Option<String> {
    match field {
        CredentialField::Wifi(WifiField::Ssid) => adapter.load_wifi().ok().map(|c| c.ssid.clone()),
        CredentialField::Cellular(CellularField::Apn) => {
            adapter.load_cellular().ok().map(|c| c.apn.clone())
        }
        CredentialField::Cellular(CellularField::User) => {
            adapter.load_cellular().ok().map(|c| c.user.clone())
        }
        _ => None,
    }
}

/// GATT service with one characteristic per credential field.
pub struct ProvisioningService {
    adapter: CredentialAdapter,
}

impl ProvisioningService {
    /// Create and register the provisioning service.
    pub fn new(server: &mut BLEServer, adapter: CredentialAdapter) -> Self {
        let service = server.create_service(PROVISIONING_SERVICE_UUID);

        for field in CredentialField::all() {
            let properties = if field.is_secret() {
                NimbleProperties::WRITE | NimbleProperties::NOTIFY
            } else {
                NimbleProperties::READ | NimbleProperties::WRITE | NimbleProperties::NOTIFY
            };
            let characteristic = service
                .lock()
                .create_characteristic(characteristic_uuid(field), properties);

            if !field.is_secret() {
                let reader = adapter.clone();
                characteristic.lock().on_read(move |char, _conn| {
                    let value = stored_value(&reader, field).unwrap_or_default();
                    char.set_value(value.as_bytes());
                });
            }

            let writer = adapter.clone();
            let notifier = Arc::downgrade(&characteristic);
            characteristic.lock().on_write(move |args| {
                match apply_write(&writer, field, args.recv_data()) {
                    Ok(ack) => {
                        if let Some(char) = notifier.upgrade() {
                            char.lock().set_value(ack.as_bytes()).notify();
                        }
                    }
                    Err(e) => warn!("BLE write to {} rejected: {}", field, e),
                }
            });
        }

        Self { adapter }
    }

    /// Start BLE advertising.
    pub fn start_advertising() -> Result<(), BLEError> {
        let device = BLEDevice::take();
        let advertising = device.get_advertising();

        advertising.lock().set_data(
            esp32_nimble::BLEAdvertisementData::new()
                .name(DEVICE_NAME)
                .add_service_uuid(PROVISIONING_SERVICE_UUID),
        )?;
        advertising.lock().start()?;
        info!("BLE provisioning advertising as '{}'", DEVICE_NAME);
        Ok(())
    }

    pub fn adapter(&self) -> &CredentialAdapter {
        &self.adapter
    }
}
