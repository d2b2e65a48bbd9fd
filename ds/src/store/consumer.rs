//! Last-writer-wins consumer store

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::DEFAULT_MAX_ACTIVE_TASKS;
use crate::domain::{
    DashboardState, ProjectRef, SUPPORTED_SCHEMA_VERSIONS, TaskProgress, TaskStatus, ValidationError, WidgetsState,
    is_supported_schema,
};

/// Buffered store events per subscriber
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Errors applying an incoming document
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Unsupported schema version {found} (supported: {supported:?})")]
    SchemaMismatch { found: u32, supported: Vec<u32> },

    #[error("Invalid document: {0}")]
    InvalidDocument(#[from] ValidationError),
}

/// Result of `apply_incoming`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The document replaced the held state
    Applied,
    /// The document was not newer and was discarded
    Stale,
}

/// Where an applied document came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplySource {
    Transport,
    Persistence,
    Sibling,
}

/// Notification sent to subscribers after a document is applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Applied { timestamp: i64, source: ApplySource },
}

struct StoreInner {
    task_limit: usize,
    state: RwLock<DashboardState>,
    events: broadcast::Sender<StoreEvent>,
}

/// Read-mostly replica of the emitter's document
///
/// Clones share the same state and event channel.
#[derive(Clone)]
pub struct ConsumerStore {
    inner: Arc<StoreInner>,
}

impl Default for ConsumerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsumerStore {
    /// Empty store: timestamp 0, current schema version
    pub fn new() -> Self {
        Self::with_task_limit(DEFAULT_MAX_ACTIVE_TASKS)
    }

    /// Empty store that refuses documents carrying more than `task_limit` tasks
    pub fn with_task_limit(task_limit: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(StoreInner {
                task_limit,
                state: RwLock::new(DashboardState::default()),
                events,
            }),
        }
    }

    /// Replace the held document if `doc` is strictly newer
    pub fn apply_incoming(&self, doc: DashboardState, source: ApplySource) -> Result<ApplyOutcome, StoreError> {
        if !is_supported_schema(doc.schema_version) {
            warn!(
                found = doc.schema_version,
                ?source,
                "apply_incoming: unsupported schema version, keeping current state"
            );
            return Err(StoreError::SchemaMismatch {
                found: doc.schema_version,
                supported: SUPPORTED_SCHEMA_VERSIONS.to_vec(),
            });
        }
        if let Err(e) = doc.validate(self.inner.task_limit) {
            warn!(error = %e, ?source, "apply_incoming: invalid document, keeping current state");
            return Err(e.into());
        }

        let timestamp = doc.timestamp;
        {
            let mut state = self.inner.state.write();
            if timestamp <= state.timestamp {
                debug!(
                    incoming = timestamp,
                    current = state.timestamp,
                    ?source,
                    "apply_incoming: stale document discarded"
                );
                return Ok(ApplyOutcome::Stale);
            }
            *state = doc;
        }

        debug!(timestamp, ?source, "apply_incoming: applied");
        // No subscribers is fine
        let _ = self.inner.events.send(StoreEvent::Applied { timestamp, source });
        Ok(ApplyOutcome::Applied)
    }

    /// Receive an event for every applied document from now on
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        debug!("ConsumerStore::subscribe: new subscriber");
        self.inner.events.subscribe()
    }

    // === Selectors ===

    pub fn active_tasks(&self) -> Vec<TaskProgress> {
        self.inner.state.read().active_tasks.clone()
    }

    pub fn task(&self, task_id: &str) -> Option<TaskProgress> {
        self.inner.state.read().task(task_id).cloned()
    }

    /// Whether any task is pending or running
    pub fn has_active_work(&self) -> bool {
        self.inner.state.read().has_active_work()
    }

    pub fn tasks_with_status(&self, status: TaskStatus) -> Vec<TaskProgress> {
        self.inner.state.read().tasks_with_status(status).cloned().collect()
    }

    /// Timestamp of the held document (0 when nothing was applied)
    pub fn timestamp(&self) -> i64 {
        self.inner.state.read().timestamp
    }

    pub fn snapshot(&self) -> DashboardState {
        self.inner.state.read().clone()
    }

    pub fn active_project(&self) -> Option<ProjectRef> {
        self.inner.state.read().active_project.clone()
    }

    pub fn widgets(&self) -> WidgetsState {
        self.inner.state.read().widgets.clone()
    }
}
