//! Throttler
//!
//! The first call of a window runs immediately and opens a cooldown window.
//! Calls made during the window overwrite a single trailing slot. When the
//! window closes the trailing call (if any) runs and opens the next window.
//! The function never runs twice at once for one handle: a trailing call
//! that falls due while the previous call is still running waits for
//! another interval.

use super::lock_state;
use crate::timing::{Clock, Scheduler, TimerId};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::trace;

/// Throttled wrapper around a function taking `A`
pub struct Throttler<A> {
    shared: Arc<ThrottleShared<A>>,
}

struct ThrottleShared<A> {
    func: Box<dyn Fn(A) + Send + Sync>,
    interval: Duration,
    scheduler: Arc<dyn Scheduler>,
    state: Mutex<ThrottleState<A>>,
}

struct ThrottleState<A> {
    /// Expiry timer of the current cooldown window, None when idle
    cooldown: Option<TimerId>,

    /// Arguments of the latest call made during the window
    trailing: Option<A>,

    /// When the current window was opened
    window_opened_at: Duration,

    /// Whether `func` is executing right now
    running: bool,
}

/// Clears the running flag when the call returns or unwinds
struct RunningGuard<'a, A>(&'a ThrottleShared<A>);

impl<A> Drop for RunningGuard<'_, A> {
    fn drop(&mut self) {
        lock_state(&self.0.state).running = false;
    }
}

impl<A: Send + 'static> Throttler<A> {
    /// Create a throttled handle around `func`
    pub fn new<F>(func: F, interval: Duration, scheduler: Arc<dyn Scheduler>) -> Self
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        Throttler {
            shared: Arc::new(ThrottleShared {
                func: Box::new(func),
                interval,
                scheduler,
                state: Mutex::new(ThrottleState {
                    cooldown: None,
                    trailing: None,
                    window_opened_at: Duration::ZERO,
                    running: false,
                }),
            }),
        }
    }

    /// Run `func` now if idle, otherwise keep `args` as the trailing call
    pub fn call(&self, args: A) {
        {
            let mut state = lock_state(&self.shared.state);
            if state.cooldown.is_some() || state.running {
                if state.trailing.is_some() {
                    trace!("Throttled call replaces buffered trailing call");
                }
                state.trailing = Some(args);
                // The window closed while the previous call was still running
                if state.cooldown.is_none() {
                    ThrottleShared::open_window(&self.shared, &mut state);
                }
                return;
            }
            ThrottleShared::open_window(&self.shared, &mut state);
            state.running = true;
        }

        let _running = RunningGuard(&*self.shared);
        (self.shared.func)(args);
    }

    /// Whether a cooldown window is currently open
    pub fn in_cooldown(&self) -> bool {
        lock_state(&self.shared.state).cooldown.is_some()
    }

    /// Whether a trailing call is buffered for the end of the window
    pub fn has_trailing(&self) -> bool {
        lock_state(&self.shared.state).trailing.is_some()
    }

    /// The configured interval
    pub fn interval(&self) -> Duration {
        self.shared.interval
    }
}

impl<A: Send + 'static> ThrottleShared<A> {
    /// Arm the expiry timer for a new cooldown window
    fn open_window(shared: &Arc<Self>, state: &mut ThrottleState<A>) {
        let expire_shared = Arc::clone(shared);
        let timer = shared.scheduler.schedule(
            shared.interval,
            Box::new(move || ThrottleShared::close_window(&expire_shared)),
        );
        state.cooldown = Some(timer);
        state.window_opened_at = shared.scheduler.now();
    }

    fn close_window(shared: &Arc<Self>) {
        let trailing = {
            let mut state = lock_state(&shared.state);
            state.cooldown = None;

            if state.trailing.is_some() && state.running {
                trace!("Previous call still running, deferring trailing call");
                Self::open_window(shared, &mut state);
                return;
            }

            match state.trailing.take() {
                Some(args) => {
                    trace!(
                        "Cooldown opened at {:?} expired, running trailing call",
                        state.window_opened_at
                    );
                    Self::open_window(shared, &mut state);
                    state.running = true;
                    args
                }
                None => return,
            }
        };

        let _running = RunningGuard(&**shared);
        (shared.func)(trailing);
    }
}

impl<A> Clone for Throttler<A> {
    fn clone(&self) -> Self {
        Throttler {
            shared: Arc::clone(&self.shared),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::{ManualScheduler, TokioScheduler};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::OnceLock;

    fn recording_throttler(
        interval_ms: u64,
    ) -> (Arc<ManualScheduler>, Throttler<u32>, Arc<Mutex<Vec<u32>>>) {
        let scheduler = Arc::new(ManualScheduler::new());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let throttler = Throttler::new(
            move |n: u32| sink.lock().unwrap().push(n),
            Duration::from_millis(interval_ms),
            scheduler.clone(),
        );
        (scheduler, throttler, calls)
    }

    #[test]
    fn test_immediate_then_trailing() {
        let (scheduler, throttler, calls) = recording_throttler(1000);

        throttler.call(1);
        assert_eq!(calls.lock().unwrap().len(), 1);

        throttler.call(2);
        assert_eq!(calls.lock().unwrap().len(), 1);
        assert!(throttler.has_trailing());

        scheduler.advance_ms(1000);
        throttler.call(3);
        assert_eq!(calls.lock().unwrap().len(), 2);
        assert_eq!(*calls.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_no_trailing_when_window_is_quiet() {
        let (scheduler, throttler, calls) = recording_throttler(100);

        throttler.call(1);
        assert!(throttler.in_cooldown());

        scheduler.advance_ms(100);
        assert_eq!(*calls.lock().unwrap(), vec![1]);
        assert!(!throttler.in_cooldown());
        assert_eq!(scheduler.pending(), 0);

        // Idle again: next call is immediate
        throttler.call(2);
        assert_eq!(*calls.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_trailing_keeps_latest_arguments() {
        let (scheduler, throttler, calls) = recording_throttler(100);

        throttler.call(1);
        throttler.call(2);
        throttler.call(3);
        throttler.call(4);
        scheduler.advance_ms(100);

        assert_eq!(*calls.lock().unwrap(), vec![1, 4]);
    }

    #[test]
    fn test_trailing_call_opens_new_window() {
        let (scheduler, throttler, calls) = recording_throttler(100);

        throttler.call(1);
        throttler.call(2);
        scheduler.advance_ms(100);
        assert!(throttler.in_cooldown());

        // Inside the window opened by the trailing call
        throttler.call(3);
        assert_eq!(*calls.lock().unwrap(), vec![1, 2]);

        scheduler.advance_ms(100);
        assert_eq!(*calls.lock().unwrap(), vec![1, 2, 3]);

        scheduler.advance_ms(100);
        assert!(!throttler.in_cooldown());
        assert_eq!(calls.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_at_most_one_call_per_interval() {
        let (scheduler, throttler, calls) = recording_throttler(100);

        // One raw event every 10ms for one second
        for n in 0..100 {
            throttler.call(n);
            scheduler.advance_ms(10);
        }
        scheduler.advance_ms(200);

        let calls = calls.lock().unwrap();
        assert!(calls.len() <= 11, "too many calls: {}", calls.len());
        assert_eq!(calls.first(), Some(&0));
        assert_eq!(calls.last(), Some(&99));
    }

    /// Counts how many executions of one throttled function overlap
    #[derive(Default)]
    struct Overlap {
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl Overlap {
        fn enter(&self) {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
        }

        fn leave(&self) {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// A throttler whose first call is slow: while it runs, `during_first`
    /// gets the handle and the scheduler to raise events and move time
    fn slow_first_call(
        during_first: fn(&Throttler<u32>, &ManualScheduler),
    ) -> (Arc<ManualScheduler>, Throttler<u32>, Arc<Mutex<Vec<u32>>>, Arc<Overlap>) {
        let scheduler = Arc::new(ManualScheduler::new());
        let handle: Arc<OnceLock<Throttler<u32>>> = Arc::new(OnceLock::new());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let overlap = Arc::new(Overlap::default());

        let (inner_handle, inner_scheduler) = (handle.clone(), scheduler.clone());
        let (sink, tracker) = (calls.clone(), overlap.clone());
        let throttler = Throttler::new(
            move |n: u32| {
                tracker.enter();
                sink.lock().unwrap().push(n);
                if n == 1 {
                    if let Some(throttler) = inner_handle.get() {
                        during_first(throttler, &inner_scheduler);
                    }
                }
                tracker.leave();
            },
            Duration::from_millis(100),
            scheduler.clone(),
        );
        assert!(handle.set(throttler.clone()).is_ok());

        (scheduler, throttler, calls, overlap)
    }

    #[test]
    fn test_trailing_call_waits_for_running_call() {
        let (scheduler, throttler, calls, overlap) = slow_first_call(|throttler, scheduler| {
            throttler.call(2);
            // The window expires while the first call is still running
            scheduler.advance_ms(150);
        });

        throttler.call(1);
        assert_eq!(*calls.lock().unwrap(), vec![1]);
        assert!(throttler.has_trailing());
        assert!(throttler.in_cooldown());

        scheduler.advance_ms(50);
        assert_eq!(*calls.lock().unwrap(), vec![1, 2]);
        assert_eq!(overlap.max_active.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_call_after_expired_window_waits_for_running_call() {
        let (scheduler, throttler, calls, overlap) = slow_first_call(|throttler, scheduler| {
            // Quiet window ends first, then a new event arrives mid-call
            scheduler.advance_ms(150);
            throttler.call(2);
        });

        throttler.call(1);
        assert_eq!(*calls.lock().unwrap(), vec![1]);
        assert!(throttler.in_cooldown());

        scheduler.advance_ms(100);
        assert_eq!(*calls.lock().unwrap(), vec![1, 2]);
        assert_eq!(overlap.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_function_never_overlaps_on_tokio() {
        let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler::new());
        let overlap = Arc::new(Overlap::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let (tracker, count) = (overlap.clone(), calls.clone());
        let throttler = Throttler::new(
            move |_: u32| {
                tracker.enter();
                std::thread::sleep(Duration::from_millis(150));
                count.fetch_add(1, Ordering::SeqCst);
                tracker.leave();
            },
            Duration::from_millis(50),
            scheduler,
        );

        let first = throttler.clone();
        let blocking = tokio::task::spawn_blocking(move || first.call(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        throttler.call(2);
        blocking.await.unwrap();

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(overlap.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_immediate_panic_propagates_to_caller() {
        let scheduler = Arc::new(ManualScheduler::new());
        let throttler = Throttler::new(
            |_: ()| panic!("refresh failed"),
            Duration::from_millis(10),
            scheduler.clone(),
        );

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| throttler.call(())));
        assert!(result.is_err());
        // The window was opened before the function ran
        assert!(throttler.in_cooldown());
    }

    #[test]
    fn test_factory_function() {
        let scheduler = Arc::new(ManualScheduler::new());
        let calls = Arc::new(Mutex::new(0usize));
        let sink = calls.clone();
        let refresh = crate::pacing::throttle(
            move |_: ()| *sink.lock().unwrap() += 1,
            Duration::from_millis(500),
            scheduler.clone(),
        );

        refresh.call(());
        refresh.call(());
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(refresh.interval(), Duration::from_millis(500));

        scheduler.advance_ms(500);
        assert_eq!(*calls.lock().unwrap(), 2);
    }
}
