//! Backend for environments without usable storage

use super::{BackendError, KeyValueBackend};
use bytes::Bytes;

/// A backend whose every operation fails with [`BackendError::Unavailable`]
#[derive(Debug, Clone)]
pub struct UnavailableBackend {
    reason: String,
}

impl UnavailableBackend {
    pub fn new(reason: impl Into<String>) -> Self {
        UnavailableBackend {
            reason: reason.into(),
        }
    }

    fn error(&self) -> BackendError {
        BackendError::Unavailable(self.reason.clone())
    }
}

impl KeyValueBackend for UnavailableBackend {
    fn get_item(&self, _key: &str) -> Result<Option<Bytes>, BackendError> {
        Err(self.error())
    }

    fn set_item(&self, _key: &str, _value: Bytes) -> Result<(), BackendError> {
        Err(self.error())
    }

    fn remove_item(&self, _key: &str) -> Result<(), BackendError> {
        Err(self.error())
    }

    fn keys(&self) -> Result<Vec<String>, BackendError> {
        Err(self.error())
    }
}
