//! Real-time scheduler backed by a tokio driver task
//!
//! All timers live in a single `DelayQueue` owned by one spawned task.
//! Callers talk to it over an unbounded channel, the same way a shard is
//! fed commands. Tasks therefore run one at a time on the driver, never
//! concurrently with each other.

use super::{panic_message, Clock, Scheduler, Task, TimerId};
use std::collections::{HashMap, HashSet};
use std::future::poll_fn;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, error, info, warn};

/// Longest delay handed to the delay queue (its wheel covers roughly two years)
pub const MAX_TIMER_DELAY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// A request sent to the driver task
enum DriverCommand {
    Schedule { id: TimerId, delay: Duration, task: Task },
    Cancel { id: TimerId },
}

/// Ids that have been scheduled and neither fired nor been cancelled
type LiveSet = Arc<Mutex<HashSet<TimerId>>>;

fn lock_live(live: &LiveSet) -> MutexGuard<'_, HashSet<TimerId>> {
    live.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scheduler that fires tasks on real (tokio) time
///
/// Dropping the scheduler closes the command channel; the driver exits once
/// the channel is closed.
pub struct TokioScheduler {
    origin: Instant,
    next_id: AtomicU64,
    command_tx: mpsc::UnboundedSender<DriverCommand>,
    live: LiveSet,
}

impl TokioScheduler {
    /// Create a scheduler and spawn its driver on the current runtime
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn new() -> Self {
        Self::spawn().0
    }

    /// Create a scheduler, returning the driver task's handle as well
    fn spawn() -> (Self, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let live: LiveSet = Arc::new(Mutex::new(HashSet::new()));

        let driver = tokio::spawn(Self::run_driver_loop(command_rx, live.clone()));
        debug!("Timer driver started");

        let scheduler = TokioScheduler {
            origin: Instant::now(),
            next_id: AtomicU64::new(1),
            command_tx,
            live,
        };
        (scheduler, driver)
    }

    /// Number of timers still waiting to fire
    pub fn pending(&self) -> usize {
        lock_live(&self.live).len()
    }

    /// The driver loop: owns the delay queue and runs expired tasks
    async fn run_driver_loop(
        mut command_rx: mpsc::UnboundedReceiver<DriverCommand>,
        live: LiveSet,
    ) {
        let mut queue: DelayQueue<TimerId> = DelayQueue::new();
        let mut tasks: HashMap<TimerId, (delay_queue::Key, Task)> = HashMap::new();

        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    match command {
                        Some(DriverCommand::Schedule { id, delay, task }) => {
                            let key = queue.insert(id, delay.min(MAX_TIMER_DELAY));
                            tasks.insert(id, (key, task));
                        }
                        Some(DriverCommand::Cancel { id }) => {
                            if let Some((key, _)) = tasks.remove(&id) {
                                queue.try_remove(&key);
                            }
                        }
                        None => {
                            info!("Timer driver shutting down ({} timer(s) dropped)", tasks.len());
                            break;
                        }
                    }
                }

                Some(expired) = poll_fn(|cx| queue.poll_expired(cx)), if !queue.is_empty() => {
                    let id = expired.into_inner();
                    let Some((_, task)) = tasks.remove(&id) else {
                        continue;
                    };

                    // Cancelled after the timer was already dequeued
                    if !lock_live(&live).remove(&id) {
                        continue;
                    }

                    if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(task)) {
                        error!("Task for {} panicked: {}", id, panic_message(payload.as_ref()));
                    }
                }
            }
        }
    }
}

impl Clock for TokioScheduler {
    fn now(&self) -> Duration {
        Instant::now().duration_since(self.origin)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerId {
        let id = TimerId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        let delay = if delay > MAX_TIMER_DELAY {
            warn!("Delay of {:?} for {} capped to {:?}", delay, id, MAX_TIMER_DELAY);
            MAX_TIMER_DELAY
        } else {
            delay
        };
        lock_live(&self.live).insert(id);

        if self
            .command_tx
            .send(DriverCommand::Schedule { id, delay, task })
            .is_err()
        {
            error!("Timer driver is gone, {} will never fire", id);
            lock_live(&self.live).remove(&id);
        }

        id
    }

    fn cancel(&self, id: TimerId) -> bool {
        if !lock_live(&self.live).remove(&id) {
            return false;
        }
        // The driver may already be gone; the live set alone keeps the task from running
        let _ = self.command_tx.send(DriverCommand::Cancel { id });
        true
    }
}
