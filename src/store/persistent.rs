//! Persistent store implementation

use crate::backend::KeyValueBackend;
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

/// Bytes of a corrupt payload shown in debug logs
const CORRUPT_PREVIEW_LEN: usize = 48;

/// Namespaced, serializing view over a durable backend
///
/// The full addressing key is `namespace + key`. No separator is inserted;
/// pick a namespace like `"alerts:"` to keep features apart.
pub struct PersistentStore<B> {
    backend: B,
    namespace: String,
}

impl<B: KeyValueBackend> PersistentStore<B> {
    /// Create a store over `backend` under `namespace`
    pub fn new(backend: B, namespace: impl Into<String>) -> Self {
        PersistentStore {
            backend,
            namespace: namespace.into(),
        }
    }

    /// The namespace prefix
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The underlying backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    /// Serialize `value` and store it under `key`, replacing any previous value
    ///
    /// Failures (serialization, unavailable backend, quota) are logged and
    /// swallowed; the previous value, if any, stays in place.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let payload = match serde_json::to_vec(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Not storing '{}': value failed to serialize: {}", key, e);
                return;
            }
        };

        if let Err(e) = self.backend.set_item(&self.full_key(key), Bytes::from(payload)) {
            warn!("Failed to store '{}' in namespace '{}': {}", key, self.namespace, e);
        }
    }

    /// Read and deserialize the value under `key`
    ///
    /// Returns None if the key is missing, the payload does not decode as a
    /// `T`, or the backend is unavailable.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let payload = self.read_raw(key)?;

        match serde_json::from_slice(&payload) {
            Ok(value) => Some(value),
            Err(e) => {
                let preview = &payload[..payload.len().min(CORRUPT_PREVIEW_LEN)];
                debug!(
                    "Treating '{}' as absent, payload does not decode ({}): {}",
                    key,
                    e,
                    general_purpose::STANDARD.encode(preview)
                );
                None
            }
        }
    }

    /// Delete `key`; missing keys and backend failures are ignored
    pub fn remove(&self, key: &str) {
        if let Err(e) = self.backend.remove_item(&self.full_key(key)) {
            warn!("Failed to remove '{}' from namespace '{}': {}", key, self.namespace, e);
        }
    }

    /// Whether `key` holds a decodable value
    pub fn contains(&self, key: &str) -> bool {
        self.get::<serde_json::Value>(key).is_some()
    }

    /// Keys of this namespace (prefix stripped), sorted
    pub fn keys(&self) -> Vec<String> {
        let all = match self.backend.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Failed to list keys of namespace '{}': {}", self.namespace, e);
                return Vec::new();
            }
        };

        let mut keys: Vec<String> = all
            .into_iter()
            .filter_map(|full| full.strip_prefix(self.namespace.as_str()).map(str::to_string))
            .collect();
        keys.sort();
        keys
    }

    /// Remove every key of this namespace, leaving other namespaces alone
    pub fn clear(&self) {
        for key in self.keys() {
            self.remove(&key);
        }
    }

    fn read_raw(&self, key: &str) -> Option<Bytes> {
        match self.backend.get_item(&self.full_key(key)) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to read '{}' from namespace '{}': {}", key, self.namespace, e);
                None
            }
        }
    }
}
