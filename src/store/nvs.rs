//! NVS persistence for credential records.
//!
//! Each record is an NVS namespace holding one string entry per key, so the
//! credentials survive reboots and firmware updates.

use super::{CredentialStore, Record, StoreError};
use crate::config::{CellularField, WifiField, CELLULAR_NAMESPACE, WIFI_NAMESPACE};
use crate::config::MAX_CREDENTIAL_LEN;
use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsDefault};
use esp_idf_sys::EspError;
use log::debug;

fn known_keys(namespace: &str) -> Vec<&'static str> {
    match namespace {
        WIFI_NAMESPACE => WifiField::ALL.iter().map(|f| f.key()).collect(),
        CELLULAR_NAMESPACE => CellularField::ALL.iter().map(|f| f.key()).collect(),
        _ => Vec::new(),
    }
}

fn backend(e: EspError) -> StoreError {
    StoreError::Backend(format!("{:?}", e))
}

/// Records in the default NVS partition.
pub struct NvsStore {
    partition: EspNvsPartition<NvsDefault>,
}

impl NvsStore {
    /// Take the default NVS partition.
    pub fn take() -> Result<Self, EspError> {
        Ok(Self {
            partition: EspNvsPartition::<NvsDefault>::take()?,
        })
    }

    pub fn new(partition: EspNvsPartition<NvsDefault>) -> Self {
        Self { partition }
    }

    fn open(&self, namespace: &str, read_write: bool) -> Result<EspNvs<NvsDefault>, StoreError> {
        EspNvs::new(self.partition.clone(), namespace, read_write).map_err(backend)
    }
}

impl CredentialStore for NvsStore {
    fn load(&self, namespace: &str) -> Result<Record, StoreError> {
        // opening read-write creates the namespace on first boot
        let nvs = self.open(namespace, true)?;
        let mut buf = [0u8; MAX_CREDENTIAL_LEN + 1];
        let mut record = Record::new();
        for key in known_keys(namespace) {
            if let Some(value) = nvs.get_str(key, &mut buf).map_err(backend)? {
                record.insert(key.to_string(), value.to_string());
            }
        }
        debug!("Loaded {} key(s) from NVS '{}'", record.len(), namespace);
        Ok(record)
    }

    fn save(&mut self, namespace: &str, record: &Record) -> Result<(), StoreError> {
        let mut nvs = self.open(namespace, true)?;
        for key in known_keys(namespace) {
            match record.get(key) {
                Some(value) => nvs.set_str(key, value).map_err(backend)?,
                None => {
                    nvs.remove(key).map_err(backend)?;
                }
            }
        }
        Ok(())
    }
}
