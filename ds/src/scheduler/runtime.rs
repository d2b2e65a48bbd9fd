//! Scheduler backed by a tokio task per armed timer

use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{Scheduler, SchedulerError, TimerCallback};

/// Runs the callback on the tokio runtime after the delay
pub struct TokioScheduler {
    handle: Handle,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            pending: Mutex::new(None),
        }
    }

    /// Bind to the runtime the caller is running on
    pub fn from_current() -> Result<Self, SchedulerError> {
        let handle = Handle::try_current().map_err(|e| SchedulerError::NoRuntime(e.to_string()))?;
        Ok(Self::new(handle))
    }
}

impl Scheduler for TokioScheduler {
    fn arm(&self, delay: Duration, callback: TimerCallback) {
        debug!(delay_ms = delay.as_millis() as u64, "TokioScheduler::arm: called");
        let task = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        if let Some(previous) = self.pending.lock().replace(task) {
            previous.abort();
        }
    }

    fn disarm(&self) {
        if let Some(previous) = self.pending.lock().take() {
            debug!("TokioScheduler::disarm: aborting pending timer");
            previous.abort();
        }
    }

    fn is_armed(&self) -> bool {
        self.pending.lock().as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        if let Some(task) = self.pending.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let scheduler = TokioScheduler::from_current().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        scheduler.arm(
            Duration::from_millis(100),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert!(scheduler.is_armed());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_pending_callback() {
        let scheduler = TokioScheduler::from_current().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let counter = fired.clone();
            scheduler.arm(
                Duration::from_millis(100),
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_prevents_fire() {
        let scheduler = TokioScheduler::from_current().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        scheduler.arm(
            Duration::from_millis(50),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        scheduler.disarm();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_from_current_without_runtime() {
        assert!(matches!(
            TokioScheduler::from_current(),
            Err(SchedulerError::NoRuntime(_))
        ));
    }
}
