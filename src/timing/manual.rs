//! Virtual-time scheduler
//!
//! Nothing happens until the owner calls [`ManualScheduler::advance`].
//! This makes every pacing behavior reproducible in tests, and lets an
//! embedder with its own event loop drive timers from its frame tick.

use super::{Clock, Scheduler, Task, TimerId};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::trace;

/// Scheduler driven by explicit calls to [`advance`](ManualScheduler::advance)
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

struct ManualState {
    /// Current virtual time
    now: Duration,

    /// Next timer id to hand out
    next_id: u64,

    /// Pending timers ordered by (due time, id); the id breaks ties FIFO
    timers: BTreeMap<(Duration, u64), Task>,

    /// id -> due time, for cancellation
    due_by_id: HashMap<u64, Duration>,
}

impl ManualScheduler {
    /// Create a scheduler whose clock starts at zero
    pub fn new() -> Self {
        ManualScheduler {
            state: Mutex::new(ManualState {
                now: Duration::ZERO,
                next_id: 1,
                timers: BTreeMap::new(),
                due_by_id: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move virtual time forward by `by`, running every timer that falls due
    ///
    /// Timers run in due-time order with the clock set to their due time.
    /// Timers scheduled by a running task that fall due before the end of
    /// the window run too. Returns the number of tasks executed.
    ///
    /// A panicking task propagates out of this call; timers that were not
    /// reached yet stay scheduled.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.lock().now.saturating_add(by);
        let mut fired = 0;

        loop {
            let task = {
                let mut state = self.lock();
                let next = state.timers.keys().next().copied();
                match next {
                    Some((due, id)) if due <= target => {
                        state.now = due;
                        state.due_by_id.remove(&id);
                        state.timers.remove(&(due, id))
                    }
                    _ => {
                        state.now = target;
                        break;
                    }
                }
            };

            if let Some(task) = task {
                fired += 1;
                task();
            }
        }

        if fired > 0 {
            trace!("Virtual clock advanced to {:?}, {} timer(s) fired", target, fired);
        }
        fired
    }

    /// Advance by milliseconds
    pub fn advance_ms(&self, ms: u64) -> usize {
        self.advance(Duration::from_millis(ms))
    }

    /// Run timers that are already due (including zero-delay timers)
    pub fn run_pending(&self) -> usize {
        self.advance(Duration::ZERO)
    }

    /// Number of timers still waiting to fire
    pub fn pending(&self) -> usize {
        self.lock().timers.len()
    }

    /// Due time of the earliest pending timer
    pub fn next_due(&self) -> Option<Duration> {
        self.lock().timers.keys().next().map(|(due, _)| *due)
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualScheduler {
    fn now(&self) -> Duration {
        self.lock().now
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerId {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;

        let due = state.now.saturating_add(delay);
        state.timers.insert((due, id), task);
        state.due_by_id.insert(id, due);

        TimerId::from_raw(id)
    }

    fn cancel(&self, id: TimerId) -> bool {
        let mut state = self.lock();
        match state.due_by_id.remove(&id.as_u64()) {
            Some(due) => state.timers.remove(&(due, id.as_u64())).is_some(),
            None => false,
        }
    }
}
