//! Debouncer
//!
//! Every call cancels the pending timer and arms a new one carrying the
//! latest arguments. Only the last call of a burst reaches the function.

use super::lock_state;
use crate::timing::{Clock, Scheduler, TimerId};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::trace;

/// Debounced wrapper around a function taking `A`
pub struct Debouncer<A> {
    shared: Arc<DebounceShared<A>>,
}

struct DebounceShared<A> {
    func: Box<dyn Fn(A) + Send + Sync>,
    delay: Duration,
    scheduler: Arc<dyn Scheduler>,
    state: Mutex<DebounceState<A>>,
}

struct DebounceState<A> {
    /// At most one armed timer with the arguments it will deliver
    pending: Option<PendingCall<A>>,

    /// Bumped on every call; a timer only fires if it still matches
    generation: u64,
}

struct PendingCall<A> {
    timer: TimerId,
    generation: u64,
    args: A,
    called_at: Duration,
}

impl<A: Send + 'static> Debouncer<A> {
    /// Create a debounced handle around `func`
    pub fn new<F>(func: F, delay: Duration, scheduler: Arc<dyn Scheduler>) -> Self
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        Debouncer {
            shared: Arc::new(DebounceShared {
                func: Box::new(func),
                delay,
                scheduler,
                state: Mutex::new(DebounceState {
                    pending: None,
                    generation: 0,
                }),
            }),
        }
    }

    /// Record a call; `func` runs with these arguments once `delay` passes
    /// without another call
    pub fn call(&self, args: A) {
        let shared = &self.shared;
        let mut state = lock_state(&shared.state);

        if let Some(previous) = state.pending.take() {
            shared.scheduler.cancel(previous.timer);
        }

        state.generation = state.generation.wrapping_add(1);
        let generation = state.generation;

        let fire_shared = Arc::clone(shared);
        let timer = shared.scheduler.schedule(
            shared.delay,
            Box::new(move || DebounceShared::fire(&fire_shared, generation)),
        );

        state.pending = Some(PendingCall {
            timer,
            generation,
            args,
            called_at: shared.scheduler.now(),
        });
    }

    /// Whether a call is waiting for the quiet period to elapse
    pub fn is_pending(&self) -> bool {
        lock_state(&self.shared.state).pending.is_some()
    }

    /// The configured quiet period
    pub fn delay(&self) -> Duration {
        self.shared.delay
    }
}

impl<A> DebounceShared<A> {
    fn fire(shared: &Arc<Self>, generation: u64) {
        let call = {
            let mut state = lock_state(&shared.state);
            match state.pending.take() {
                Some(call) if call.generation == generation => call,
                superseded => {
                    state.pending = superseded;
                    return;
                }
            }
        };

        trace!(
            "Debounced call fired after {:?} quiet",
            shared.scheduler.now().saturating_sub(call.called_at)
        );
        (shared.func)(call.args);
    }
}

impl<A> Clone for Debouncer<A> {
    fn clone(&self) -> Self {
        Debouncer {
            shared: Arc::clone(&self.shared),
        }
    }
}
