//! Storage trait definitions.

use crate::StorageResult;

/// Trait for key-value storage backends.
///
/// Implementations must be safe to share between relay instances; every
/// call is expected to be short and non-blocking in practice.
pub trait KeyValueStore: Send + Sync {
    /// Store a value, replacing any previous value for the key
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Retrieve a value
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Delete a value. Returns whether a value was present.
    fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Check if a key exists
    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}
