//! perfkit - Timing control and keyed persistence utilities
//!
//! perfkit is built from small, independent pieces:
//! - `timing`: injected clock and scheduler (virtual or tokio-driven)
//! - `pacing`: debounce and throttle wrappers around caller functions
//! - `backend`: durable key-value backends (memory, log file, unavailable)
//! - `store`: namespaced, serializing, fail-safe facade over a backend
//!
//! The pieces compose only at the call site, e.g. a search box debounces its
//! query and remembers the last one in a persistent store.

pub mod timing;
pub mod pacing;
pub mod backend;
pub mod store;
pub mod config;

/// Re-export commonly used types
pub use timing::{Clock, ManualScheduler, Scheduler, TimerId, TokioScheduler};
pub use pacing::{debounce, throttle, Debouncer, Throttler};
pub use backend::{BackendError, FileBackend, KeyValueBackend, MemoryBackend, UnavailableBackend};
pub use store::PersistentStore;
pub use config::Config;
