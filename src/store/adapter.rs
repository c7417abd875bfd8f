//! Typed credential access with change signalling.
//!
//! The adapter is the only writer of credential records. Every successful
//! write raises the changed flag for its credential set; the orchestrator
//! consumes each flag exactly once.

use super::{CredentialStore, StoreError};
use crate::config::{
    display_value, CellularCredentials, CellularField, CredentialField, WifiCredentials,
    WifiField, CELLULAR_NAMESPACE, WIFI_NAMESPACE,
};
use crate::provisioning::{validate_value, ProvisionError, Provisioning};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared handle to the credential store.
#[derive(Clone)]
pub struct CredentialAdapter {
    store: Arc<Mutex<Box<dyn CredentialStore>>>,
    wifi_changed: Arc<AtomicBool>,
    cellular_changed: Arc<AtomicBool>,
}

impl CredentialAdapter {
    pub fn new(store: impl CredentialStore + 'static) -> Self {
        Self {
            store: Arc::new(Mutex::new(Box::new(store))),
            wifi_changed: Arc::new(AtomicBool::new(false)),
            cellular_changed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn CredentialStore>> {
        self.store.lock().unwrap_or_else(|poisoned| {
            warn!("Credential store mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn load_wifi(&self) -> Result<WifiCredentials, StoreError> {
        let record = self.lock().load(WIFI_NAMESPACE)?;
        Ok(WifiCredentials::from_record(&record))
    }

    pub fn load_cellular(&self) -> Result<CellularCredentials, StoreError> {
        let record = self.lock().load(CELLULAR_NAMESPACE)?;
        Ok(CellularCredentials::from_record(&record))
    }

    /// Persist one WLAN field and raise the WLAN changed flag.
    pub fn set_wifi_credential(&self, field: WifiField, value: &str) -> Result<(), ProvisionError> {
        let value = validate_value(value.as_bytes())?;
        {
            let mut store = self.lock();
            let mut creds = WifiCredentials::from_record(&store.load(WIFI_NAMESPACE)?);
            creds.set(field, value);
            store.save(WIFI_NAMESPACE, &creds.to_record())?;
        }
        self.wifi_changed.store(true, Ordering::Release);
        let tagged = CredentialField::Wifi(field);
        info!("Credential {} set to {}", tagged, display_value(tagged, value));
        Ok(())
    }

    /// Persist one APN field and raise the cellular changed flag.
    pub fn set_cellular_credential(
        &self,
        field: CellularField,
        value: &str,
    ) -> Result<(), ProvisionError> {
        let value = validate_value(value.as_bytes())?;
        {
            let mut store = self.lock();
            let mut creds = CellularCredentials::from_record(&store.load(CELLULAR_NAMESPACE)?);
            creds.set(field, value);
            store.save(CELLULAR_NAMESPACE, &creds.to_record())?;
        }
        self.cellular_changed.store(true, Ordering::Release);
        let tagged = CredentialField::Cellular(field);
        info!("Credential {} set to {}", tagged, display_value(tagged, value));
        Ok(())
    }

    /// Consume the WLAN changed flag.
    pub fn take_wifi_changed(&self) -> bool {
        self.wifi_changed.swap(false, Ordering::AcqRel)
    }

    /// Consume the cellular changed flag.
    pub fn take_cellular_changed(&self) -> bool {
        self.cellular_changed.swap(false, Ordering::AcqRel)
    }
}

impl Provisioning for CredentialAdapter {
    fn on_write(&self, field: CredentialField, value: &[u8]) -> Result<(), ProvisionError> {
        let text = validate_value(value)?;
        match field {
            CredentialField::Wifi(f) => self.set_wifi_credential(f, text),
            CredentialField::Cellular(f) => self.set_cellular_credential(f, text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn adapter() -> CredentialAdapter {
        CredentialAdapter::new(MemoryStore::new())
    }

    #[test]
    fn test_defaults_before_provisioning() {
        let adapter = adapter();
        assert!(!adapter.load_wifi().unwrap().is_configured());
        assert_eq!(
            adapter.load_cellular().unwrap(),
            CellularCredentials::default()
        );
        assert!(!adapter.take_wifi_changed());
        assert!(!adapter.take_cellular_changed());
    }

    #[test]
    fn test_wifi_write_persists_and_flags_once() {
        let adapter = adapter();
        adapter.set_wifi_credential(WifiField::Ssid, "FieldNet").unwrap();
        adapter
            .set_wifi_credential(WifiField::Password, "hunter22")
            .unwrap();

        assert_eq!(
            adapter.load_wifi().unwrap(),
            WifiCredentials::new("FieldNet", "hunter22")
        );
        assert!(adapter.take_wifi_changed());
        assert!(!adapter.take_wifi_changed());
        assert!(!adapter.take_cellular_changed());
    }

    #[test]
    fn test_cellular_write_keeps_other_defaults() {
        let adapter = adapter();
        adapter
            .set_cellular_credential(CellularField::Apn, "m2m.carrier")
            .unwrap();

        let creds = adapter.load_cellular().unwrap();
        assert_eq!(creds.apn, "m2m.carrier");
        assert_eq!(creds.user, "internet");
        assert!(adapter.take_cellular_changed());
        assert!(!adapter.take_wifi_changed());
    }

    #[test]
    fn test_rejected_write_leaves_flag_clear() {
        let adapter = adapter();
        assert!(matches!(
            adapter.set_wifi_credential(WifiField::Ssid, ""),
            Err(ProvisionError::Empty)
        ));
        let long = "x".repeat(128);
        assert!(matches!(
            adapter.set_cellular_credential(CellularField::User, &long),
            Err(ProvisionError::TooLong { len: 128, .. })
        ));
        assert!(!adapter.take_wifi_changed());
        assert!(!adapter.take_cellular_changed());
    }

    #[test]
    fn test_on_write_dispatches_by_field() {
        let adapter = adapter();
        adapter
            .on_write(CredentialField::Cellular(CellularField::Password), b"s3cret")
            .unwrap();
        adapter
            .on_write(CredentialField::Wifi(WifiField::Ssid), b"Barn")
            .unwrap();

        assert_eq!(adapter.load_cellular().unwrap().password, "s3cret");
        assert_eq!(adapter.load_wifi().unwrap().ssid, "Barn");
        assert!(matches!(
            adapter.on_write(CredentialField::Wifi(WifiField::Ssid), &[0xFF, 0xFE]),
            Err(ProvisionError::InvalidUtf8)
        ));
    }

    #[test]
    fn test_clones_share_flags() {
        let adapter = adapter();
        let provisioning = adapter.clone();
        provisioning
            .set_wifi_credential(WifiField::Password, "newpass1")
            .unwrap();
        assert!(adapter.take_wifi_changed());
    }
}
