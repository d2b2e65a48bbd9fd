//! Debounce timer abstraction
//!
//! The emitter and the persistence controller each own one `Scheduler`. A
//! scheduler holds at most one pending callback: `arm` replaces whatever was
//! pending, `disarm` drops it. `TokioScheduler` backs it with a runtime task;
//! `ManualScheduler` fires only when a test advances virtual time.

mod manual;
mod runtime;

use std::time::Duration;

use thiserror::Error;

pub use manual::ManualScheduler;
pub use runtime::TokioScheduler;

/// Work to run when the timer fires
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Errors creating a scheduler
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),
}

/// Single-slot timer: arm, disarm, fire
pub trait Scheduler: Send + Sync {
    /// Arm the timer, replacing any pending callback
    fn arm(&self, delay: Duration, callback: TimerCallback);

    /// Drop the pending callback, if any
    fn disarm(&self);

    /// Whether a callback is waiting to fire
    fn is_armed(&self) -> bool;
}
