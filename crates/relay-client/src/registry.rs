//! Registry of live local ids.

use crate::{RelayError, RelayResult};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Set of local ids owned by live relay instances.
///
/// Cloning shares the underlying set. Every instance built by one
/// [`crate::RelayHub`] claims its id here, so two live instances can never
/// share an id.
#[derive(Debug, Clone, Default)]
pub struct LiveIdRegistry {
    ids: Arc<Mutex<HashSet<String>>>,
}

impl LiveIdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `local_id` for a new instance.
    pub fn claim(&self, local_id: &str) -> RelayResult<()> {
        if local_id.is_empty() {
            return Err(RelayError::InvalidLocalId(local_id.to_string()));
        }

        let mut ids = self.ids.lock();
        if !ids.insert(local_id.to_string()) {
            return Err(RelayError::DuplicateLocalId(local_id.to_string()));
        }
        Ok(())
    }

    /// Release `local_id`. Returns whether it was held.
    pub fn release(&self, local_id: &str) -> bool {
        self.ids.lock().remove(local_id)
    }

    pub fn is_live(&self, local_id: &str) -> bool {
        self.ids.lock().contains(local_id)
    }

    /// Number of live ids.
    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }
}
