//! Call pacing
//!
//! Wrap a caller-supplied function so that a burst of raw events turns into
//! fewer real calls:
//! - [`Debouncer`]: one call after a quiet period, with the last arguments
//! - [`Throttler`]: at most one call per interval, plus one trailing call
//!
//! Each handle owns its own timer state and is driven by an injected
//! [`Scheduler`](crate::timing::Scheduler). Cloning a handle shares that state.

mod debounce;
mod throttle;

pub use debounce::Debouncer;
pub use throttle::Throttler;

use crate::timing::Scheduler;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Wrap `func` so rapid calls collapse into one call after `delay` of quiet
pub fn debounce<A, F>(func: F, delay: Duration, scheduler: Arc<dyn Scheduler>) -> Debouncer<A>
where
    A: Send + 'static,
    F: Fn(A) + Send + Sync + 'static,
{
    Debouncer::new(func, delay, scheduler)
}

/// Wrap `func` so it runs at most once per `interval`, with a trailing call
pub fn throttle<A, F>(func: F, interval: Duration, scheduler: Arc<dyn Scheduler>) -> Throttler<A>
where
    A: Send + 'static,
    F: Fn(A) + Send + Sync + 'static,
{
    Throttler::new(func, interval, scheduler)
}

/// Lock handle state, ignoring poisoning (the caller's function never runs under the lock)
pub(crate) fn lock_state<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
