//! Volatile credential store.

use super::{CredentialStore, Record, StoreError};
use std::collections::HashMap;

/// Records kept in memory for the lifetime of the process.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: HashMap<String, Record>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a record.
    pub fn with_record(mut self, namespace: &str, record: Record) -> Self {
        self.records.insert(namespace.to_string(), record);
        self
    }
}

impl CredentialStore for MemoryStore {
    fn load(&self, namespace: &str) -> Result<Record, StoreError> {
        Ok(self.records.get(namespace).cloned().unwrap_or_default())
    }

    fn save(&mut self, namespace: &str, record: &Record) -> Result<(), StoreError> {
        self.records.insert(namespace.to_string(), record.clone());
        Ok(())
    }
}
