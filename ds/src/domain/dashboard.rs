//! The canonical dashboard document
//!
//! `DashboardState` is what the emitter owns, the transport carries, consumer
//! stores hold and the persistence controller writes. `loading` and `errors`
//! are transient and never persisted.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::bounded::BoundedList;
use super::task::{TaskProgress, TaskStatus};

/// Schema version written by this build
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Schema versions this build can apply
pub const SUPPORTED_SCHEMA_VERSIONS: &[u32] = &[1];

/// Default cap for the alerts list
pub const DEFAULT_ALERT_CAPACITY: usize = 50;

/// Default cap for the activity feed
pub const DEFAULT_ACTIVITY_CAPACITY: usize = 100;

/// Whether a document with this schema version can be applied
pub fn is_supported_schema(version: u32) -> bool {
    SUPPORTED_SCHEMA_VERSIONS.contains(&version)
}

/// Reference to the project the dashboard is showing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRef {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ProjectRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            path: None,
        }
    }
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    #[default]
    Info,
    Warning,
    Error,
}

/// A dashboard alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub level: AlertLevel,
    pub message: String,
    /// Unix milliseconds
    pub created_at: i64,
}

impl Alert {
    /// Create an alert with a fresh id
    pub fn new(level: AlertLevel, message: impl Into<String>, created_at: i64) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            level,
            message: message.into(),
            created_at,
        }
    }
}

/// One line of the activity feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub message: String,
    /// Unix milliseconds
    pub at: i64,
}

/// Widget payloads
///
/// Panel contents are opaque JSON keyed by widget id. The two feeds are
/// bounded so the document cannot grow without limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetsState {
    #[serde(default)]
    pub panels: BTreeMap<String, Value>,
    pub alerts: BoundedList<Alert>,
    pub activity: BoundedList<ActivityEntry>,
}

impl WidgetsState {
    pub fn with_capacities(alert_capacity: usize, activity_capacity: usize) -> Self {
        Self {
            panels: BTreeMap::new(),
            alerts: BoundedList::new(alert_capacity),
            activity: BoundedList::new(activity_capacity),
        }
    }
}

impl Default for WidgetsState {
    fn default() -> Self {
        Self::with_capacities(DEFAULT_ALERT_CAPACITY, DEFAULT_ACTIVITY_CAPACITY)
    }
}

/// Loading indicators (transient)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingState {
    pub is_loading: bool,
    pub loading_agents: BTreeSet<String>,
}

impl LoadingState {
    /// Add or remove an agent; `is_loading` follows the set
    pub fn set_agent(&mut self, agent: &str, loading: bool) -> bool {
        let changed = if loading {
            self.loading_agents.insert(agent.to_string())
        } else {
            self.loading_agents.remove(agent)
        };
        self.is_loading = !self.loading_agents.is_empty();
        changed
    }

    pub fn is_empty(&self) -> bool {
        !self.is_loading && self.loading_agents.is_empty()
    }
}

/// Problems found by `DashboardState::validate`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Duplicate task id: {0}")]
    DuplicateTaskId(String),

    #[error("Too many active tasks: {count} > {max}")]
    TooManyTasks { count: usize, max: usize },

    #[error("Task {task_id} step at position {position} has index {index}")]
    StepIndexMismatch {
        task_id: String,
        position: usize,
        index: usize,
    },

    #[error("Task {task_id} step {index} progress {progress} is above 100")]
    ProgressOutOfRange { task_id: String, index: usize, progress: u8 },

    #[error("Task {task_id} current step {current} is out of range for {total} steps")]
    CurrentStepOutOfRange {
        task_id: String,
        current: usize,
        total: usize,
    },
}

/// The canonical, versioned dashboard document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardState {
    pub schema_version: u32,
    /// Logical clock (Unix milliseconds); strictly increasing per producer
    pub timestamp: i64,
    #[serde(default)]
    pub active_project: Option<ProjectRef>,
    #[serde(default)]
    pub widgets: WidgetsState,
    #[serde(default)]
    pub active_tasks: Vec<TaskProgress>,
    #[serde(default)]
    pub loading: LoadingState,
    #[serde(default)]
    pub errors: BTreeMap<String, String>,
}

impl Default for DashboardState {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            timestamp: 0,
            active_project: None,
            widgets: WidgetsState::default(),
            active_tasks: Vec::new(),
            loading: LoadingState::default(),
            errors: BTreeMap::new(),
        }
    }
}

impl DashboardState {
    /// Empty document with the given widget feed capacities
    pub fn with_capacities(alert_capacity: usize, activity_capacity: usize) -> Self {
        Self {
            widgets: WidgetsState::with_capacities(alert_capacity, activity_capacity),
            ..Self::default()
        }
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskProgress> {
        self.active_tasks.iter().find(|t| t.task_id == task_id)
    }

    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut TaskProgress> {
        self.active_tasks.iter_mut().find(|t| t.task_id == task_id)
    }

    pub fn has_task(&self, task_id: &str) -> bool {
        self.task(task_id).is_some()
    }

    /// Any task pending or running
    pub fn has_active_work(&self) -> bool {
        self.active_tasks.iter().any(|t| t.is_active())
    }

    pub fn tasks_with_status(&self, status: TaskStatus) -> impl Iterator<Item = &TaskProgress> {
        self.active_tasks.iter().filter(move |t| t.status == status)
    }

    /// Copy without the transient fields, as written to durable storage
    pub fn without_transient(&self) -> Self {
        Self {
            loading: LoadingState::default(),
            errors: BTreeMap::new(),
            ..self.clone()
        }
    }

    /// Remove terminal tasks that finished more than `retention_ms` ago
    pub fn purge_terminal_tasks(&mut self, retention_ms: u64, now: i64) -> usize {
        let before = self.active_tasks.len();
        let retention = i64::try_from(retention_ms).unwrap_or(i64::MAX);
        self.active_tasks
            .retain(|t| t.terminal_age_ms(now).is_none_or(|age| age <= retention));
        before - self.active_tasks.len()
    }

    /// Evict the terminal task that finished first, if any
    pub fn evict_oldest_terminal(&mut self) -> Option<TaskProgress> {
        let position = self
            .active_tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_terminal())
            .min_by_key(|(_, t)| t.finished_at.unwrap_or(i64::MIN))
            .map(|(i, _)| i)?;
        Some(self.active_tasks.remove(position))
    }

    /// Check the structural invariants of the document
    pub fn validate(&self, max_active_tasks: usize) -> Result<(), ValidationError> {
        if self.active_tasks.len() > max_active_tasks {
            return Err(ValidationError::TooManyTasks {
                count: self.active_tasks.len(),
                max: max_active_tasks,
            });
        }

        let mut seen = HashSet::new();
        for task in &self.active_tasks {
            if !seen.insert(task.task_id.as_str()) {
                return Err(ValidationError::DuplicateTaskId(task.task_id.clone()));
            }
            for (position, step) in task.steps.iter().enumerate() {
                if step.index != position {
                    return Err(ValidationError::StepIndexMismatch {
                        task_id: task.task_id.clone(),
                        position,
                        index: step.index,
                    });
                }
                if let Some(progress) = step.progress.filter(|p| *p > 100) {
                    return Err(ValidationError::ProgressOutOfRange {
                        task_id: task.task_id.clone(),
                        index: step.index,
                        progress,
                    });
                }
            }
            if task.total_steps > 0 && task.current_step >= task.total_steps {
                return Err(ValidationError::CurrentStepOutOfRange {
                    task_id: task.task_id.clone(),
                    current: task.current_step,
                    total: task.total_steps,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_document() {
        let state = DashboardState::default();
        assert_eq!(state.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(state.timestamp, 0);
        assert!(state.active_tasks.is_empty());
        assert_eq!(state.widgets.alerts.capacity(), DEFAULT_ALERT_CAPACITY);
    }

    #[test]
    fn test_loading_follows_agent_set() {
        let mut loading = LoadingState::default();
        assert!(loading.set_agent("researcher", true));
        assert!(loading.is_loading);
        assert!(!loading.set_agent("researcher", true));
        assert!(loading.set_agent("researcher", false));
        assert!(!loading.is_loading);
        assert!(loading.is_empty());
    }

    #[test]
    fn test_without_transient_strips_loading_and_errors() {
        let mut state = DashboardState::default();
        state.loading.set_agent("a", true);
        state.errors.insert("fetch".into(), "boom".into());
        state.active_project = Some(ProjectRef::new("p1", "Project One"));

        let stripped = state.without_transient();
        assert!(stripped.loading.is_empty());
        assert!(stripped.errors.is_empty());
        assert_eq!(stripped.active_project, state.active_project);
    }

    #[test]
    fn test_purge_terminal_tasks_respects_retention() {
        let mut state = DashboardState::default();
        let mut old = TaskProgress::start("old", "Old", &steps(&["a"]), None, 0);
        old.complete(1_000).unwrap();
        let mut recent = TaskProgress::start("recent", "Recent", &steps(&["a"]), None, 0);
        recent.fail("x", 9_000).unwrap();
        let running = TaskProgress::start("running", "Running", &steps(&["a"]), None, 0);
        state.active_tasks = vec![old, recent, running];

        let removed = state.purge_terminal_tasks(5_000, 10_000);
        assert_eq!(removed, 1);
        assert!(!state.has_task("old"));
        assert!(state.has_task("recent"));
        assert!(state.has_task("running"));
    }

    #[test]
    fn test_evict_oldest_terminal() {
        let mut state = DashboardState::default();
        let mut a = TaskProgress::start("a", "A", &steps(&["x"]), None, 0);
        a.cancel(500).unwrap();
        let mut b = TaskProgress::start("b", "B", &steps(&["x"]), None, 0);
        b.cancel(100).unwrap();
        let c = TaskProgress::start("c", "C", &steps(&["x"]), None, 0);
        state.active_tasks = vec![a, b, c];

        let evicted = state.evict_oldest_terminal().unwrap();
        assert_eq!(evicted.task_id, "b");
        assert_eq!(state.active_tasks.len(), 2);

        state.active_tasks.retain(|t| !t.is_terminal());
        assert!(state.evict_oldest_terminal().is_none());
    }

    #[test]
    fn test_validate_detects_duplicates_and_bounds() {
        let mut state = DashboardState::default();
        let task = TaskProgress::start("dup", "Dup", &steps(&["x"]), None, 0);
        state.active_tasks = vec![task.clone(), task];
        assert_eq!(state.validate(10), Err(ValidationError::DuplicateTaskId("dup".into())));
        assert!(matches!(state.validate(1), Err(ValidationError::TooManyTasks { count: 2, max: 1 })));
    }

    #[test]
    fn test_validate_checks_step_indices() {
        let mut state = DashboardState::default();
        let mut task = TaskProgress::start("t", "T", &steps(&["x", "y"]), None, 0);
        task.steps[1].index = 5;
        state.active_tasks.push(task);
        assert!(matches!(
            state.validate(10),
            Err(ValidationError::StepIndexMismatch { position: 1, index: 5, .. })
        ));
    }

    #[test]
    fn test_json_uses_camel_case_fields() {
        let state = DashboardState::default();
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["schemaVersion"], 1);
        assert!(json.get("activeTasks").is_some());
        assert_eq!(json["loading"]["isLoading"], false);
    }

    #[test]
    fn test_supported_schema() {
        assert!(is_supported_schema(CURRENT_SCHEMA_VERSION));
        assert!(!is_supported_schema(99));
    }
}
