//! Durable key-value backends
//!
//! A backend is the environment-provided string/byte store the persistent
//! store sits on top of. It may be missing, full, or broken; callers must
//! treat every operation as fallible.

mod memory;
mod record;
mod file;
mod unavailable;

pub use memory::MemoryBackend;
pub use record::{Record, RecordOp};
pub use file::FileBackend;
pub use unavailable::UnavailableBackend;

use bytes::Bytes;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

/// Backend failures
#[derive(Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Storage is disabled or not reachable at all
    Unavailable(String),

    /// Write rejected because it would exceed the byte quota
    QuotaExceeded { limit: usize, requested: usize },

    /// Key or value too long to be stored
    TooLarge(String),

    /// Underlying I/O failure
    Io(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Unavailable(reason) => write!(f, "Storage unavailable: {}", reason),
            BackendError::QuotaExceeded { limit, requested } => write!(
                f,
                "Quota exceeded: {} bytes requested, limit is {} bytes",
                requested, limit
            ),
            BackendError::TooLarge(msg) => write!(f, "Entry too large: {}", msg),
            BackendError::Io(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self {
        BackendError::Io(e.to_string())
    }
}

/// Minimal get/set/remove interface of a durable key-value store
///
/// Implementations guarantee atomic per-key operations: a reader sees either
/// the previous value or the new one, never a partial write.
pub trait KeyValueBackend: Send + Sync {
    /// Read the raw value stored under `key`
    fn get_item(&self, key: &str) -> Result<Option<Bytes>, BackendError>;

    /// Store `value` under `key`, replacing any previous value
    fn set_item(&self, key: &str, value: Bytes) -> Result<(), BackendError>;

    /// Delete `key`; deleting a missing key is not an error
    fn remove_item(&self, key: &str) -> Result<(), BackendError>;

    /// All keys currently stored
    fn keys(&self) -> Result<Vec<String>, BackendError>;
}

impl<B: KeyValueBackend + ?Sized> KeyValueBackend for Box<B> {
    fn get_item(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
        (**self).get_item(key)
    }

    fn set_item(&self, key: &str, value: Bytes) -> Result<(), BackendError> {
        (**self).set_item(key, value)
    }

    fn remove_item(&self, key: &str) -> Result<(), BackendError> {
        (**self).remove_item(key)
    }

    fn keys(&self) -> Result<Vec<String>, BackendError> {
        (**self).keys()
    }
}

impl<B: KeyValueBackend + ?Sized> KeyValueBackend for Arc<B> {
    fn get_item(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
        (**self).get_item(key)
    }

    fn set_item(&self, key: &str, value: Bytes) -> Result<(), BackendError> {
        (**self).set_item(key, value)
    }

    fn remove_item(&self, key: &str) -> Result<(), BackendError> {
        (**self).remove_item(key)
    }

    fn keys(&self) -> Result<Vec<String>, BackendError> {
        (**self).keys()
    }
}

/// Log sync policy for the file backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    /// Sync after every write (safest, slowest)
    Always,
    /// Sync at most once per second (balanced)
    EverySecond,
    /// Let the OS decide when to sync (fastest, least safe)
    No,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        SyncPolicy::EverySecond
    }
}

/// Checks a write against an optional byte quota
///
/// `used` is the current usage, `freed` what the write releases (the old
/// entry), `added` what it consumes.
pub(crate) fn check_quota(
    quota: Option<usize>,
    used: usize,
    freed: usize,
    added: usize,
) -> Result<(), BackendError> {
    if let Some(limit) = quota {
        let requested = used.saturating_sub(freed) + added;
        if requested > limit {
            return Err(BackendError::QuotaExceeded { limit, requested });
        }
    }
    Ok(())
}
