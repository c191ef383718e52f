//! File-backed store.
//!
//! The on-disk format is a JSON document holding an ordered list of
//! `{key, val}` entries. An in-memory index maps each key to its position in
//! the list so lookups stay O(1); deletes are O(n) because later entries shift
//! down.
//!
//! Every mutation is written through to disk via a temp file and rename, so a
//! crash never leaves a half-written document behind.

use crate::{KeyValueStore, StorageResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// A single stored string entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,
    pub val: String,
}

/// Serialized document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    pub strs: Vec<Entry>,
}

struct Inner {
    data: StoreData,
    index: HashMap<String, usize>,
}

impl Inner {
    fn new(data: StoreData) -> Self {
        let index = data
            .strs
            .iter()
            .enumerate()
            .map(|(i, entry)| (entry.key.clone(), i))
            .collect();
        Self { data, index }
    }
}

/// Key-value store persisted to a single JSON file.
pub struct FileStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl FileStore {
    /// Open the store at `path`, creating parent directories as needed.
    ///
    /// A missing file starts an empty store. A file that cannot be parsed is
    /// logged and removed, and the store starts empty.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let data = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match serde_json::from_str::<StoreData>(&content) {
                Ok(data) => data,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Stored data is malformed, discarding it");
                    std::fs::remove_file(path)?;
                    StoreData::default()
                }
            }
        } else {
            StoreData::default()
        };

        debug!(path = %path.display(), entries = data.strs.len(), "Opened file store");

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner::new(data)),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove every entry and the backing file.
    pub fn delete_all(&self) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        *inner = Inner::new(StoreData::default());
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    /// Snapshot of the stored document.
    pub fn raw_data(&self) -> StoreData {
        self.inner.lock().data.clone()
    }

    fn flush(&self, data: &StoreData) -> StorageResult<()> {
        let json = serde_json::to_string(data)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        let entry = Entry {
            key: key.to_string(),
            val: value.to_string(),
        };

        match inner.index.get(key).copied() {
            Some(i) => inner.data.strs[i] = entry,
            None => {
                let i = inner.data.strs.len();
                inner.index.insert(key.to_string(), i);
                inner.data.strs.push(entry);
            }
        }

        self.flush(&inner.data)
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let inner = self.inner.lock();
        Ok(inner
            .index
            .get(key)
            .map(|&i| inner.data.strs[i].val.clone()))
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let mut inner = self.inner.lock();
        let Some(removed) = inner.index.remove(key) else {
            return Ok(false);
        };

        inner.data.strs.remove(removed);
        for i in inner.index.values_mut() {
            if *i > removed {
                *i -= 1;
            }
        }

        self.flush(&inner.data)?;
        Ok(true)
    }

    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.inner.lock().index.contains_key(key))
    }
}
