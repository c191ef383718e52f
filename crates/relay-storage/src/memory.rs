//! In-memory store.

use crate::{KeyValueStore, StorageResult};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Process-local storage. Contents are lost when the store is dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.data.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.data.lock().get(key).cloned())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        Ok(self.data.lock().remove(key).is_some())
    }
}
