//! Key-value storage abstraction for SimpleRelay.
//!
//! This crate provides:
//! - **[`KeyValueStore`]**: the trait the relay client persists through
//! - **[`MemoryStore`]**: process-local store for tests and embedding
//! - **[`FileStore`]**: a JSON file of indexed `{key, val}` entries,
//!   written through on every mutation

mod file;
mod keys;
mod memory;
mod traits;

pub use file::FileStore;
pub use keys::StorageKeys;
pub use memory::MemoryStore;
pub use traits::KeyValueStore;

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Encoding(e.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Open the file-backed store at `path` as a shareable trait object.
pub fn open_file_store(path: &Path) -> StorageResult<Arc<dyn KeyValueStore>> {
    let store = FileStore::open(path)?;
    Ok(Arc::new(store))
}
