//! Keyed persistent store
//!
//! A namespaced get/set/remove facade over a [`KeyValueBackend`](crate::backend::KeyValueBackend),
//! with JSON serialization and fail-safe degradation: backend failures and
//! corrupt payloads never reach the caller.

mod persistent;

pub use persistent::PersistentStore;
