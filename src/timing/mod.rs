//! Timer and clock collaborators
//!
//! Pacing handles never read wall-clock time or spawn timers themselves.
//! They are handed a [`Scheduler`] at construction and ask it to run a
//! closure later. Two implementations are provided:
//! - [`ManualScheduler`]: virtual time, advanced explicitly by the caller
//! - [`TokioScheduler`]: real timers driven by a single tokio task

mod manual;
mod tokio_driver;

pub use manual::ManualScheduler;
pub use tokio_driver::{TokioScheduler, MAX_TIMER_DELAY};

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A deferred unit of work handed to a scheduler
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Opaque identifier of a scheduled timer
///
/// Ids are allocated in increasing order by each scheduler and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        TimerId(raw)
    }

    /// Raw numeric value (for logging)
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Monotonic time source
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock's origin
    fn now(&self) -> Duration;
}

/// "Run this after N milliseconds" / "cancel this scheduled run"
///
/// Implementations must fire timers in due-time order. A task never runs
/// from inside `schedule`, even with a zero delay.
pub trait Scheduler: Clock {
    /// Schedule `task` to run once `delay` has elapsed
    fn schedule(&self, delay: Duration, task: Task) -> TimerId;

    /// Cancel a scheduled timer
    ///
    /// Returns true if the timer was still pending. Cancelling a timer that
    /// already fired (or was already cancelled) is a no-op.
    fn cancel(&self, id: TimerId) -> bool;
}

impl<S: Clock + ?Sized> Clock for Arc<S> {
    fn now(&self) -> Duration {
        (**self).now()
    }
}

impl<S: Scheduler + ?Sized> Scheduler for Arc<S> {
    fn schedule(&self, delay: Duration, task: Task) -> TimerId {
        (**self).schedule(delay, task)
    }

    fn cancel(&self, id: TimerId) -> bool {
        (**self).cancel(id)
    }
}

/// Best-effort extraction of a panic payload message
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
