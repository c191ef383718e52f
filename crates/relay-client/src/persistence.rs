//! Saved connection records.

use crate::{ConnectionConfig, RelayError, RelayResult};
use relay_storage::{KeyValueStore, StorageKeys};
use std::sync::Arc;
use tracing::{debug, warn};

/// Saves and restores [`ConnectionConfig`] records keyed by local id.
#[derive(Clone)]
pub struct ConfigStore {
    store: Arc<dyn KeyValueStore>,
}

impl ConfigStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn save(&self, config: &ConnectionConfig) -> RelayResult<()> {
        let json = serde_json::to_string(config)?;
        debug!(local_id = %config.local_id, "Saving config");
        self.store
            .set(&StorageKeys::saved_config(&config.local_id), &json)?;
        Ok(())
    }

    /// Load the record saved for `local_id`.
    ///
    /// A record that cannot be decoded is removed and reported as
    /// [`RelayError::MalformedConfig`].
    pub fn load(&self, local_id: &str) -> RelayResult<ConnectionConfig> {
        let key = StorageKeys::saved_config(local_id);
        let json = match self.store.get(&key)? {
            Some(json) if !json.is_empty() => json,
            _ => return Err(RelayError::NoSavedConfig(local_id.to_string())),
        };

        match serde_json::from_str::<ConnectionConfig>(&json) {
            Ok(mut config) => {
                config.local_id = local_id.to_string();
                Ok(config)
            }
            Err(e) => {
                warn!(local_id = %local_id, error = %e, "Failed to load config, clearing it");
                self.store.delete(&key)?;
                Err(RelayError::MalformedConfig {
                    local_id: local_id.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    pub fn clear(&self, local_id: &str) -> RelayResult<()> {
        self.store.delete(&StorageKeys::saved_config(local_id))?;
        Ok(())
    }

    /// Whether a record exists to rejoin with.
    pub fn can_resume(&self, local_id: &str) -> bool {
        match self.store.get(&StorageKeys::saved_config(local_id)) {
            Ok(value) => value.is_some_and(|v| !v.is_empty()),
            Err(e) => {
                warn!(local_id = %local_id, error = %e, "Failed to read saved config");
                false
            }
        }
    }
}
