//! Emitter implementation

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::errors::EmitterError;
use crate::clock::Clock;
use crate::config::EmitterConfig;
use crate::domain::{
    ActivityEntry, Alert, AlertLevel, DashboardState, ProjectRef, StepStatus, TaskProgress, WidgetsState,
};
use crate::scheduler::Scheduler;
use crate::transport::Transport;

/// Why a flush happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushKind {
    /// Debounce timer fired
    Debounced,
    /// Task progress mutation
    Immediate,
    /// Explicit `flush_now`
    Forced,
}

/// Counters for observing flush behaviour
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmitterMetrics {
    /// Documents handed to the transport (including failed sends)
    pub flushes: u64,
    pub debounced_flushes: u64,
    pub immediate_flushes: u64,
    pub forced_flushes: u64,
    /// Normal-priority mutations that changed state
    pub normal_mutations: u64,
    /// Normal mutations folded into an already pending flush
    pub coalesced_mutations: u64,
    /// Task progress mutations that changed state
    pub immediate_mutations: u64,
    pub transport_errors: u64,
    /// Timestamp of the last flushed document
    pub last_timestamp: i64,
}

struct EmitterInner {
    config: EmitterConfig,
    state: DashboardState,
    dirty: bool,
    /// Bumped on every arm and flush; a timer only fires for its own generation
    generation: u64,
    metrics: EmitterMetrics,
    transport: Arc<dyn Transport>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
}

impl EmitterInner {
    fn now(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Publish the current document; on transport failure the state stays dirty
    fn flush(&mut self, kind: FlushKind) -> bool {
        let timestamp = self.now().max(self.metrics.last_timestamp + 1);
        self.state.timestamp = timestamp;
        self.metrics.last_timestamp = timestamp;
        self.dirty = false;
        self.generation += 1;

        self.metrics.flushes += 1;
        match kind {
            FlushKind::Debounced => self.metrics.debounced_flushes += 1,
            FlushKind::Immediate => self.metrics.immediate_flushes += 1,
            FlushKind::Forced => self.metrics.forced_flushes += 1,
        }

        debug!(?kind, timestamp, tasks = self.state.active_tasks.len(), "Emitter::flush");
        match self.transport.send(&self.state) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, timestamp, "Emitter::flush: transport failed, will retry after debounce");
                self.metrics.transport_errors += 1;
                self.dirty = true;
                false
            }
        }
    }
}

/// Owner of the canonical `DashboardState`
///
/// Cloning gives another handle to the same state. Every mutation takes the
/// internal lock, so mutations never interleave and timer arming is part of
/// the same critical section.
#[derive(Clone)]
pub struct Emitter {
    inner: Arc<Mutex<EmitterInner>>,
}

impl Emitter {
    /// Create an emitter with an empty document
    pub fn new(
        config: EmitterConfig,
        transport: Arc<dyn Transport>,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = DashboardState::with_capacities(config.alert_capacity, config.activity_capacity);
        Self::from_parts(config, state, transport, scheduler, clock)
    }

    /// Create an emitter seeded with an existing document
    ///
    /// The document must satisfy `DashboardState::validate` under the
    /// configured task limit.
    pub fn with_state(
        config: EmitterConfig,
        state: DashboardState,
        transport: Arc<dyn Transport>,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EmitterError> {
        state.validate(config.max_active_tasks)?;
        Ok(Self::from_parts(config, state, transport, scheduler, clock))
    }

    fn from_parts(
        config: EmitterConfig,
        state: DashboardState,
        transport: Arc<dyn Transport>,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        debug!(
            debounce_ms = config.debounce_ms,
            max_active_tasks = config.max_active_tasks,
            "Emitter::new: called"
        );
        let metrics = EmitterMetrics {
            last_timestamp: state.timestamp,
            ..Default::default()
        };
        Self {
            inner: Arc::new(Mutex::new(EmitterInner {
                config,
                state,
                dirty: false,
                generation: 0,
                metrics,
                transport,
                scheduler,
                clock,
            })),
        }
    }

    // === Flush machinery ===

    /// Apply a normal-priority mutation; `f` returns whether anything changed
    fn mutate<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut DashboardState, i64) -> bool,
    {
        self.mutate_with(|state, now| {
            let changed = f(state, now);
            (changed, changed)
        })
    }

    /// Like `mutate`, but `f` also hands back a value for the caller
    fn mutate_with<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&mut DashboardState, i64) -> (T, bool),
    {
        let mut inner = self.inner.lock();
        let now = inner.now();
        let (value, changed) = f(&mut inner.state, now);
        if changed {
            inner.metrics.normal_mutations += 1;
            if inner.dirty {
                inner.metrics.coalesced_mutations += 1;
            }
            inner.dirty = true;
            Self::arm_debounce(&self.inner, &mut inner);
        }
        value
    }

    /// Apply a task mutation and flush before returning
    fn mutate_immediate<T, F>(&self, f: F) -> Result<T, EmitterError>
    where
        F: FnOnce(&mut EmitterInner, i64) -> Result<T, EmitterError>,
    {
        let mut inner = self.inner.lock();
        let now = inner.now();
        let value = f(&mut *inner, now)?;
        inner.metrics.immediate_mutations += 1;
        inner.scheduler.disarm();
        if !inner.flush(FlushKind::Immediate) {
            Self::arm_debounce(&self.inner, &mut inner);
        }
        Ok(value)
    }

    fn arm_debounce(shared: &Arc<Mutex<EmitterInner>>, inner: &mut EmitterInner) {
        inner.generation += 1;
        let generation = inner.generation;
        let weak: Weak<Mutex<EmitterInner>> = Arc::downgrade(shared);
        let delay = inner.config.debounce();
        inner.scheduler.arm(
            delay,
            Box::new(move || {
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                let mut inner = shared.lock();
                if inner.generation != generation || !inner.dirty {
                    debug!(generation, "Emitter: stale debounce timer ignored");
                    return;
                }
                if !inner.flush(FlushKind::Debounced) {
                    Self::arm_debounce(&shared, &mut inner);
                }
            }),
        );
    }

    /// Flush pending normal-priority changes now (e.g. before shutdown)
    pub fn flush_now(&self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.dirty {
            return false;
        }
        debug!("flush_now: flushing pending changes");
        inner.scheduler.disarm();
        if !inner.flush(FlushKind::Forced) {
            Self::arm_debounce(&self.inner, &mut inner);
        }
        true
    }

    // === Normal-priority mutations ===

    /// Replace all widget payloads; feed capacities stay as configured
    pub fn set_widgets(&self, widgets: WidgetsState) {
        debug!(panels = widgets.panels.len(), "set_widgets: called");
        let (alert_cap, activity_cap) = {
            let inner = self.inner.lock();
            (inner.config.alert_capacity, inner.config.activity_capacity)
        };
        self.mutate(move |state, _| {
            let mut widgets = widgets;
            widgets.alerts.set_capacity(alert_cap);
            widgets.activity.set_capacity(activity_cap);
            state.widgets = widgets;
            true
        });
    }

    pub fn set_active_project(&self, project: Option<ProjectRef>) {
        debug!(project = ?project.as_ref().map(|p| &p.id), "set_active_project: called");
        self.mutate(move |state, _| {
            if state.active_project == project {
                return false;
            }
            state.active_project = project;
            true
        });
    }

    /// Set one panel's opaque payload
    pub fn set_panel(&self, widget_id: impl Into<String>, payload: Value) {
        let widget_id = widget_id.into();
        debug!(%widget_id, "set_panel: called");
        self.mutate(move |state, _| {
            if state.widgets.panels.get(&widget_id) == Some(&payload) {
                return false;
            }
            state.widgets.panels.insert(widget_id, payload);
            true
        });
    }

    pub fn remove_panel(&self, widget_id: &str) -> bool {
        debug!(%widget_id, "remove_panel: called");
        self.mutate(|state, _| state.widgets.panels.remove(widget_id).is_some())
    }

    /// Add an alert; the oldest alert is evicted once the feed is full
    pub fn push_alert(&self, level: AlertLevel, message: impl Into<String>) -> Alert {
        let message = message.into();
        debug!(?level, %message, "push_alert: called");
        self.mutate_with(|state, now| {
            let alert = Alert::new(level, message, now);
            let evicted = state.widgets.alerts.push(alert.clone());
            if evicted > 0 {
                debug!(evicted, "push_alert: evicted oldest alerts");
            }
            (alert, true)
        })
    }

    /// Append a line to the activity feed
    pub fn log_activity(&self, message: impl Into<String>) {
        let message = message.into();
        self.mutate(|state, now| {
            state.widgets.activity.push(ActivityEntry { message, at: now });
            true
        });
    }

    /// Mark an agent as loading or done; `loading` never persists
    pub fn set_agent_loading(&self, agent: &str, loading: bool) {
        debug!(%agent, loading, "set_agent_loading: called");
        self.mutate(|state, _| state.loading.set_agent(agent, loading));
    }

    pub fn set_error(&self, key: impl Into<String>, message: impl Into<String>) {
        let key = key.into();
        let message = message.into();
        debug!(%key, "set_error: called");
        self.mutate(move |state, _| {
            if state.errors.get(&key) == Some(&message) {
                return false;
            }
            state.errors.insert(key, message);
            true
        });
    }

    pub fn clear_error(&self, key: &str) -> bool {
        self.mutate(|state, _| state.errors.remove(key).is_some())
    }

    pub fn clear_errors(&self) {
        self.mutate(|state, _| {
            let had_errors = !state.errors.is_empty();
            state.errors.clear();
            had_errors
        });
    }

    /// Purge terminal tasks older than `retention_ms` (configured default when `None`)
    pub fn cleanup_completed_tasks(&self, retention_ms: Option<u64>) -> usize {
        let retention_ms = retention_ms.unwrap_or_else(|| self.inner.lock().config.task_retention_ms);
        let removed = self.mutate_with(|state, now| {
            let removed = state.purge_terminal_tasks(retention_ms, now);
            (removed, removed > 0)
        });
        if removed > 0 {
            info!(removed, retention_ms, "Swept finished tasks");
        }
        removed
    }

    /// Run `cleanup_completed_tasks` on an interval until the emitter is dropped
    pub fn spawn_retention_sweeper(&self, every: Duration) -> JoinHandle<()> {
        debug!(every_ms = every.as_millis() as u64, "spawn_retention_sweeper: called");
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    debug!("retention sweeper: emitter dropped, stopping");
                    break;
                };
                Emitter { inner }.cleanup_completed_tasks(None);
            }
        })
    }

    // === Task progress (immediate flush) ===

    /// Start tracking a task with the given step names
    pub fn start_task<I, S>(
        &self,
        task_id: impl Into<String>,
        task_name: impl Into<String>,
        steps: I,
        estimated_duration_ms: Option<u64>,
    ) -> Result<TaskProgress, EmitterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let task_id = task_id.into();
        let task_name = task_name.into();
        let steps: Vec<String> = steps.into_iter().map(Into::into).collect();
        debug!(%task_id, %task_name, step_count = steps.len(), "start_task: called");

        self.mutate_immediate(|inner, now| {
            if inner.state.has_task(&task_id) {
                debug!(%task_id, "start_task: duplicate task id");
                return Err(EmitterError::DuplicateTask(task_id.clone()));
            }

            let max = inner.config.max_active_tasks;
            let state = &mut inner.state;
            if state.active_tasks.len() >= max && !state.active_tasks.iter().any(|t| t.is_terminal()) {
                warn!(%task_id, max, "start_task: active task limit reached");
                return Err(EmitterError::CapacityExceeded { max });
            }

            let swept = state.purge_terminal_tasks(inner.config.task_retention_ms, now);
            if swept > 0 {
                debug!(swept, "start_task: swept expired tasks");
            }
            while state.active_tasks.len() >= max {
                match state.evict_oldest_terminal() {
                    Some(evicted) => debug!(evicted = %evicted.task_id, "start_task: evicted finished task"),
                    None => return Err(EmitterError::CapacityExceeded { max }),
                }
            }

            let task = TaskProgress::start(task_id.clone(), task_name.clone(), &steps, estimated_duration_ms, now);
            state.active_tasks.push(task.clone());
            info!(%task_id, %task_name, "Task started");
            Ok(task)
        })
    }

    /// Update one step's status and optional progress percentage
    pub fn update_task_step(
        &self,
        task_id: &str,
        step_index: usize,
        status: StepStatus,
        progress: Option<u8>,
    ) -> Result<(), EmitterError> {
        debug!(%task_id, step_index, %status, ?progress, "update_task_step: called");
        self.mutate_immediate(|inner, now| {
            let task = inner
                .state
                .task_mut(task_id)
                .ok_or_else(|| EmitterError::TaskNotFound(task_id.to_string()))?;
            task.update_step(step_index, status, progress, now)?;
            Ok(())
        })
    }

    /// Mark a task and all its steps completed
    pub fn complete_task(&self, task_id: &str) -> Result<(), EmitterError> {
        debug!(%task_id, "complete_task: called");
        self.mutate_immediate(|inner, now| {
            let task = inner
                .state
                .task_mut(task_id)
                .ok_or_else(|| EmitterError::TaskNotFound(task_id.to_string()))?;
            task.complete(now)?;
            info!(%task_id, "Task completed");
            Ok(())
        })
    }

    /// Mark a task failed with an error message
    pub fn fail_task(&self, task_id: &str, error: impl Into<String>) -> Result<(), EmitterError> {
        let error = error.into();
        debug!(%task_id, %error, "fail_task: called");
        self.mutate_immediate(|inner, now| {
            let task = inner
                .state
                .task_mut(task_id)
                .ok_or_else(|| EmitterError::TaskNotFound(task_id.to_string()))?;
            task.fail(error.clone(), now)?;
            warn!(%task_id, %error, "Task failed");
            Ok(())
        })
    }

    /// Cancel a task; running steps keep their status
    pub fn cancel_task(&self, task_id: &str) -> Result<(), EmitterError> {
        debug!(%task_id, "cancel_task: called");
        self.mutate_immediate(|inner, now| {
            let task = inner
                .state
                .task_mut(task_id)
                .ok_or_else(|| EmitterError::TaskNotFound(task_id.to_string()))?;
            task.cancel(now)?;
            info!(%task_id, "Task cancelled");
            Ok(())
        })
    }

    // === Reads ===

    /// Copy of the canonical document
    pub fn snapshot(&self) -> DashboardState {
        self.inner.lock().state.clone()
    }

    pub fn task(&self, task_id: &str) -> Option<TaskProgress> {
        self.inner.lock().state.task(task_id).cloned()
    }

    pub fn active_task_count(&self) -> usize {
        self.inner.lock().state.active_tasks.len()
    }

    /// Whether normal-priority changes are waiting for the debounce timer
    pub fn is_dirty(&self) -> bool {
        self.inner.lock().dirty
    }

    pub fn metrics(&self) -> EmitterMetrics {
        self.inner.lock().metrics.clone()
    }

    pub fn config(&self) -> EmitterConfig {
        self.inner.lock().config.clone()
    }
}
