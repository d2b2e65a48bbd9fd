//! Virtual-time scheduler for deterministic tests

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use super::{Scheduler, TimerCallback};
use crate::clock::ManualClock;

struct Pending {
    deadline_ms: u64,
    callback: TimerCallback,
}

#[derive(Default)]
struct Inner {
    now_ms: u64,
    pending: Option<Pending>,
    fired: u64,
}

/// Scheduler that only fires when `advance` moves virtual time past the deadline
///
/// Clones share the same timer. When built with `with_clock`, advancing the
/// scheduler also advances the clock so document timestamps move in step.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    inner: Arc<Mutex<Inner>>,
    clock: Option<ManualClock>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: ManualClock) -> Self {
        Self {
            inner: Arc::default(),
            clock: Some(clock),
        }
    }

    /// Move virtual time forward; returns true if the pending callback fired
    pub fn advance(&self, delta: Duration) -> bool {
        let delta_ms = delta.as_millis() as u64;
        if let Some(clock) = &self.clock {
            clock.advance(delta_ms as i64);
        }
        let due = {
            let mut inner = self.inner.lock();
            inner.now_ms += delta_ms;
            let now = inner.now_ms;
            match inner.pending.take() {
                Some(p) if p.deadline_ms <= now => {
                    inner.fired += 1;
                    Some(p.callback)
                }
                other => {
                    inner.pending = other;
                    None
                }
            }
        };
        // Run outside the lock: callbacks may re-arm
        match due {
            Some(callback) => {
                debug!("ManualScheduler::advance: firing callback");
                callback();
                true
            }
            None => false,
        }
    }

    /// Fire the pending callback regardless of its deadline
    pub fn fire_now(&self) -> bool {
        let due = {
            let mut inner = self.inner.lock();
            let pending = inner.pending.take();
            if pending.is_some() {
                inner.fired += 1;
            }
            pending
        };
        match due {
            Some(p) => {
                (p.callback)();
                true
            }
            None => false,
        }
    }

    /// Virtual deadline of the pending callback
    pub fn deadline_ms(&self) -> Option<u64> {
        self.inner.lock().pending.as_ref().map(|p| p.deadline_ms)
    }

    /// Number of callbacks fired so far
    pub fn fired_count(&self) -> u64 {
        self.inner.lock().fired
    }
}

impl Scheduler for ManualScheduler {
    fn arm(&self, delay: Duration, callback: TimerCallback) {
        let mut inner = self.inner.lock();
        let deadline_ms = inner.now_ms + delay.as_millis() as u64;
        debug!(deadline_ms, "ManualScheduler::arm: called");
        inner.pending = Some(Pending { deadline_ms, callback });
    }

    fn disarm(&self) {
        self.inner.lock().pending = None;
    }

    fn is_armed(&self) -> bool {
        self.inner.lock().pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter_callback(counter: &Arc<AtomicUsize>) -> TimerCallback {
        let counter = counter.clone();
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_fires_only_after_deadline() {
        let scheduler = ManualScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        scheduler.arm(Duration::from_millis(100), counter_callback(&count));

        assert!(!scheduler.advance(Duration::from_millis(99)));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(scheduler.advance(Duration::from_millis(1)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_armed());
    }

    #[test]
    fn test_rearm_pushes_deadline_out() {
        let scheduler = ManualScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        scheduler.arm(Duration::from_millis(100), counter_callback(&count));
        scheduler.advance(Duration::from_millis(60));
        scheduler.arm(Duration::from_millis(100), counter_callback(&count));
        assert_eq!(scheduler.deadline_ms(), Some(160));

        scheduler.advance(Duration::from_millis(60));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        scheduler.advance(Duration::from_millis(40));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.fired_count(), 1);
    }

    #[test]
    fn test_disarm_and_fire_now() {
        let scheduler = ManualScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        scheduler.arm(Duration::from_secs(10), counter_callback(&count));
        scheduler.disarm();
        assert!(!scheduler.fire_now());

        scheduler.arm(Duration::from_secs(10), counter_callback(&count));
        assert!(scheduler.fire_now());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_advances_linked_clock() {
        let clock = ManualClock::new(1_000);
        let scheduler = ManualScheduler::with_clock(clock.clone());
        scheduler.advance(Duration::from_millis(500));
        assert_eq!(clock.now_ms(), 1_500);
    }
}
