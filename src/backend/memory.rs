//! In-memory backend
//!
//! Lives as long as the process. Useful for tests and as a fallback when no
//! durable storage is configured.

use super::{check_quota, BackendError, KeyValueBackend};
use bytes::Bytes;
use siphasher::sip::SipHasher13;
use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Type alias for our hash map with SipHasher
type ItemMap = HashMap<String, Bytes, BuildHasherDefault<SipHasher13>>;

/// Key-value backend held in a hash map
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    quota: Option<usize>,
}

struct MemoryState {
    items: ItemMap,

    /// Sum of key and value lengths
    used_bytes: usize,
}

impl MemoryBackend {
    /// Create an unbounded backend
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a backend that rejects writes beyond `quota_bytes`
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self::build(Some(quota_bytes))
    }

    fn build(quota: Option<usize>) -> Self {
        MemoryBackend {
            state: Mutex::new(MemoryState {
                items: HashMap::with_capacity_and_hasher(
                    64,
                    BuildHasherDefault::<SipHasher13>::default(),
                ),
                used_bytes: 0,
            }),
            quota,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored items
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Check if the backend is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate bytes in use (keys + values)
    pub fn used_bytes(&self) -> usize {
        self.lock().used_bytes
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueBackend for MemoryBackend {
    fn get_item(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
        Ok(self.lock().items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: Bytes) -> Result<(), BackendError> {
        let mut state = self.lock();
        let freed = state
            .items
            .get(key)
            .map(|old| key.len() + old.len())
            .unwrap_or(0);
        let added = key.len() + value.len();

        check_quota(self.quota, state.used_bytes, freed, added)?;

        state.items.insert(key.to_string(), value);
        state.used_bytes = state.used_bytes - freed + added;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), BackendError> {
        let mut state = self.lock();
        if let Some(old) = state.items.remove(key) {
            state.used_bytes -= key.len() + old.len();
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, BackendError> {
        Ok(self.lock().items.keys().cloned().collect())
    }
}
