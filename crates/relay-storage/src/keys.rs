//! Storage key constants.

/// Storage keys used by SimpleRelay
pub struct StorageKeys;

impl StorageKeys {
    /// Prefix of the saved connection record, one per local relay id.
    pub const SAVED_CONFIG_PREFIX: &'static str = "simple_relay_saved_config_";

    /// Key holding the saved connection record for `local_id`.
    pub fn saved_config(local_id: &str) -> String {
        format!("{}{}", Self::SAVED_CONFIG_PREFIX, local_id)
    }
}
