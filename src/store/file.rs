//! Credential persistence for host (development) builds.
//!
//! All records live in one JSON object keyed by namespace, stored at
//! `~/.fieldlink/credentials.json` by default. Writes are verified by reading
//! the file back.

use super::{CredentialStore, Record, StoreError};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Get the default credentials file path.
///
/// Returns `~/.fieldlink/credentials.json`
pub fn default_credentials_path() -> io::Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "HOME not set"))?;
    Ok(PathBuf::from(home)
        .join(".fieldlink")
        .join("credentials.json"))
}

type Records = BTreeMap<String, Record>;

/// Records in a single JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default path.
    pub fn open_default() -> io::Result<Self> {
        Ok(Self::new(default_credentials_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Records, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No credentials file at {:?}", self.path);
                return Ok(Records::new());
            }
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            return Ok(Records::new());
        }
        serde_json::from_str(&text).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    fn write_all(&self, records: &Records) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let text = serde_json::to_string_pretty(records)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        fs::write(&self.path, &text)?;

        // Verify write by reading back
        let read_back = fs::read_to_string(&self.path)?;
        if read_back != text {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "credentials verification failed: wrote {} bytes, read {} bytes",
                    text.len(),
                    read_back.len()
                ),
            )));
        }
        Ok(())
    }
}

impl CredentialStore for JsonFileStore {
    fn load(&self, namespace: &str) -> Result<Record, StoreError> {
        match self.read_all() {
            Ok(mut records) => Ok(records.remove(namespace).unwrap_or_default()),
            Err(StoreError::Corrupt(msg)) => {
                // unreadable file behaves like a missing one; the next save rewrites it
                warn!("Ignoring corrupt credentials file {:?}: {}", self.path, msg);
                Ok(Record::new())
            }
            Err(e) => Err(e),
        }
    }

    fn save(&mut self, namespace: &str, record: &Record) -> Result<(), StoreError> {
        let mut records = self.read_all().unwrap_or_default();
        records.insert(namespace.to_string(), record.clone());
        self.write_all(&records)?;
        info!("Saved '{}' credentials to {:?}", namespace, self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::unique_temp_path;

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_save_and_load() {
        let path = unique_temp_path("credentials", "json");
        let mut store = JsonFileStore::new(&path);

        let wifi = record(&[("ssid", "FieldNet"), ("password", "hunter22")]);
        store.save("wifi", &wifi).unwrap();

        let reopened = JsonFileStore::new(&path);
        assert_eq!(reopened.load("wifi").unwrap(), wifi);
        assert!(reopened.load("cellular").unwrap().is_empty());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_namespaces_are_independent() {
        let path = unique_temp_path("credentials", "json");
        let mut store = JsonFileStore::new(&path);

        store.save("wifi", &record(&[("ssid", "A")])).unwrap();
        store.save("cellular", &record(&[("apn", "web")])).unwrap();
        store.save("wifi", &record(&[("ssid", "B")])).unwrap();

        assert_eq!(store.load("wifi").unwrap(), record(&[("ssid", "B")]));
        assert_eq!(store.load("cellular").unwrap(), record(&[("apn", "web")]));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let store = JsonFileStore::new(unique_temp_path("credentials", "json"));
        assert!(store.load("wifi").unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_file_loads_empty_and_is_repaired() {
        let path = unique_temp_path("credentials", "json");
        fs::write(&path, "{not json").unwrap();
        let mut store = JsonFileStore::new(&path);

        assert!(store.load("wifi").unwrap().is_empty());
        store.save("wifi", &record(&[("ssid", "C")])).unwrap();
        assert_eq!(store.load("wifi").unwrap(), record(&[("ssid", "C")]));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_creates_parent_directory() {
        let dir = unique_temp_path("store-dir", "d");
        let path = dir.join("nested").join("credentials.json");
        let mut store = JsonFileStore::new(&path);

        store.save("wifi", &record(&[("ssid", "D")])).unwrap();
        assert!(path.exists());

        let _ = fs::remove_dir_all(&dir);
    }
}
