//! Task progress state machine
//!
//! A `TaskProgress` tracks one multi-step unit of background work. The
//! methods here are the only place task/step statuses change; the emitter
//! calls them under its lock and turns the result into a flush.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Registered but not started
    #[default]
    Pending,
    /// Actively working through steps
    Running,
    /// All steps done
    Completed,
    /// Stopped on an error
    Failed,
    /// Stopped by request
    Cancelled,
}

impl TaskStatus {
    /// Completed, failed and cancelled tasks accept no further changes
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Pending or running
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running) => true,
            (Self::Pending, Self::Failed | Self::Cancelled) => true,
            (Self::Running, Self::Running) => true,
            (Self::Running, Self::Completed | Self::Failed | Self::Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Step status (steps are never cancelled; see `TaskProgress::cancel`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Errors from task state transitions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("Step {step_index} not found in task {task_id}")]
    StepNotFound { task_id: String, step_index: usize },

    #[error("Task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
}

/// One step of a tracked task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStep {
    /// Position within the task (0-based)
    pub index: usize,
    pub name: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    /// Sub-step progress in percent, 0..=100
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
}

impl TaskStep {
    pub fn new(index: usize, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            progress: None,
        }
    }

    fn mark(&mut self, status: StepStatus, progress: Option<u8>, now: i64) {
        self.status = status;
        match status {
            StepStatus::Running => {
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                }
                self.completed_at = None;
            }
            StepStatus::Completed | StepStatus::Failed => {
                self.started_at.get_or_insert(now);
                self.completed_at = Some(now);
            }
            StepStatus::Pending => {}
        }
        if let Some(p) = progress {
            self.progress = Some(p.min(100));
        } else if status == StepStatus::Completed {
            self.progress = Some(100);
        }
    }
}

/// A tracked multi-step unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
    pub task_id: String,
    pub task_name: String,
    pub status: TaskStatus,
    /// Highest step index that is running or completed
    pub current_step: usize,
    pub total_steps: usize,
    pub steps: Vec<TaskStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_completion_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the task entered a terminal status (Unix milliseconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
}

impl TaskProgress {
    /// Create a running task with all steps pending
    pub fn start(
        task_id: impl Into<String>,
        task_name: impl Into<String>,
        steps: &[String],
        estimated_duration_ms: Option<u64>,
        now: i64,
    ) -> Self {
        let task_id = task_id.into();
        debug!(%task_id, step_count = steps.len(), "TaskProgress::start: called");
        Self {
            task_id,
            task_name: task_name.into(),
            status: TaskStatus::Running,
            current_step: 0,
            total_steps: steps.len(),
            steps: steps
                .iter()
                .enumerate()
                .map(|(index, name)| TaskStep::new(index, name.clone()))
                .collect(),
            started_at: Some(now),
            estimated_completion_ms: estimated_duration_ms,
            error: None,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn step(&self, index: usize) -> Option<&TaskStep> {
        self.steps.get(index)
    }

    /// Milliseconds since the task became terminal; `None` while active
    pub fn terminal_age_ms(&self, now: i64) -> Option<i64> {
        if !self.is_terminal() {
            return None;
        }
        // Tasks restored without a finish stamp count as finished immediately
        let finished = self.finished_at.unwrap_or(i64::MIN / 2);
        Some(now.saturating_sub(finished))
    }

    /// Set one step's status and optional progress
    pub fn update_step(
        &mut self,
        step_index: usize,
        status: StepStatus,
        progress: Option<u8>,
        now: i64,
    ) -> Result<(), TaskError> {
        debug!(task_id = %self.task_id, step_index, %status, ?progress, "TaskProgress::update_step: called");
        self.check_transition(TaskStatus::Running)?;
        if step_index >= self.steps.len() {
            return Err(TaskError::StepNotFound {
                task_id: self.task_id.clone(),
                step_index,
            });
        }

        if self.status == TaskStatus::Pending {
            debug!("TaskProgress::update_step: pending task promoted to running");
            self.status = TaskStatus::Running;
            self.started_at.get_or_insert(now);
        }

        self.steps[step_index].mark(status, progress, now);
        self.recompute_current_step();
        Ok(())
    }

    /// Mark the task and every step completed
    pub fn complete(&mut self, now: i64) -> Result<(), TaskError> {
        debug!(task_id = %self.task_id, "TaskProgress::complete: called");
        self.check_transition(TaskStatus::Completed)?;
        for step in &mut self.steps {
            if step.status != StepStatus::Completed {
                step.mark(StepStatus::Completed, None, now);
            }
        }
        self.status = TaskStatus::Completed;
        self.current_step = self.total_steps.saturating_sub(1);
        self.finished_at = Some(now);
        Ok(())
    }

    /// Mark the task failed; any running step fails with it
    pub fn fail(&mut self, error: impl Into<String>, now: i64) -> Result<(), TaskError> {
        debug!(task_id = %self.task_id, "TaskProgress::fail: called");
        self.check_transition(TaskStatus::Failed)?;
        for step in &mut self.steps {
            if step.status == StepStatus::Running {
                step.mark(StepStatus::Failed, None, now);
            }
        }
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(now);
        Ok(())
    }

    /// Mark the task cancelled; step statuses stay as they were for audit
    pub fn cancel(&mut self, now: i64) -> Result<(), TaskError> {
        debug!(task_id = %self.task_id, "TaskProgress::cancel: called");
        self.check_transition(TaskStatus::Cancelled)?;
        self.status = TaskStatus::Cancelled;
        self.finished_at = Some(now);
        Ok(())
    }

    fn check_transition(&self, to: TaskStatus) -> Result<(), TaskError> {
        if self.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(TaskError::InvalidTransition {
                task_id: self.task_id.clone(),
                from: self.status,
                to,
            })
        }
    }

    fn recompute_current_step(&mut self) {
        self.current_step = self
            .steps
            .iter()
            .rev()
            .find(|s| matches!(s.status, StepStatus::Running | StepStatus::Completed))
            .map(|s| s.index)
            .unwrap_or(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn research() -> TaskProgress {
        let steps: Vec<String> = ["Gather", "Analyze", "Report"].iter().map(|s| s.to_string()).collect();
        TaskProgress::start("t1", "Research", &steps, Some(30_000), 1_000)
    }

    #[test]
    fn test_start_creates_running_task_with_pending_steps() {
        let task = research();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.total_steps, 3);
        assert_eq!(task.started_at, Some(1_000));
        assert!(task.steps.iter().all(|s| s.status == StepStatus::Pending));
        assert_eq!(task.steps[2].index, 2);
    }

    #[test]
    fn test_running_step_stamps_started_at_once() {
        let mut task = research();
        task.update_step(0, StepStatus::Running, None, 2_000).unwrap();
        task.update_step(0, StepStatus::Running, Some(40), 3_000).unwrap();
        let step = task.step(0).unwrap();
        assert_eq!(step.started_at, Some(2_000));
        assert_eq!(step.progress, Some(40));
        assert_eq!(step.completed_at, None);
    }

    #[test]
    fn test_completed_step_stamps_completed_at() {
        let mut task = research();
        task.update_step(1, StepStatus::Completed, None, 5_000).unwrap();
        let step = task.step(1).unwrap();
        assert_eq!(step.completed_at, Some(5_000));
        assert_eq!(step.started_at, Some(5_000));
        assert_eq!(step.progress, Some(100));
    }

    #[test]
    fn test_current_step_is_highest_running_or_completed() {
        let mut task = research();
        assert_eq!(task.current_step, 0);
        task.update_step(0, StepStatus::Completed, None, 1).unwrap();
        task.update_step(1, StepStatus::Running, None, 2).unwrap();
        assert_eq!(task.current_step, 1);
        task.update_step(2, StepStatus::Failed, None, 3).unwrap();
        assert_eq!(task.current_step, 1);
    }

    #[test]
    fn test_progress_is_clamped() {
        let mut task = research();
        task.update_step(0, StepStatus::Running, Some(250), 1).unwrap();
        assert_eq!(task.step(0).unwrap().progress, Some(100));
    }

    #[test]
    fn test_unknown_step_is_rejected() {
        let mut task = research();
        let before = task.clone();
        let err = task.update_step(7, StepStatus::Running, None, 1).unwrap_err();
        assert_eq!(
            err,
            TaskError::StepNotFound {
                task_id: "t1".to_string(),
                step_index: 7
            }
        );
        assert_eq!(task, before);
    }

    #[test]
    fn test_complete_forces_all_steps_completed() {
        let mut task = research();
        task.update_step(0, StepStatus::Running, None, 10).unwrap();
        task.complete(20).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.steps.iter().all(|s| s.status == StepStatus::Completed));
        assert_eq!(task.current_step, 2);
        assert_eq!(task.finished_at, Some(20));
        assert_eq!(task.step(0).unwrap().started_at, Some(10));
    }

    #[test]
    fn test_fail_marks_running_step_failed() {
        let mut task = research();
        task.update_step(0, StepStatus::Completed, None, 10).unwrap();
        task.update_step(1, StepStatus::Running, None, 11).unwrap();
        task.fail("Network timeout", 12).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("Network timeout"));
        assert_eq!(task.step(0).unwrap().status, StepStatus::Completed);
        assert_eq!(task.step(1).unwrap().status, StepStatus::Failed);
        assert_eq!(task.step(1).unwrap().completed_at, Some(12));
        assert_eq!(task.step(2).unwrap().status, StepStatus::Pending);
    }

    #[test]
    fn test_cancel_leaves_running_steps_untouched() {
        let mut task = research();
        task.update_step(1, StepStatus::Running, None, 10).unwrap();
        task.cancel(15).unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(task.step(1).unwrap().status, StepStatus::Running);
        assert_eq!(task.step(1).unwrap().completed_at, None);
    }

    #[test]
    fn test_terminal_task_rejects_changes() {
        let mut task = research();
        task.complete(5).unwrap();
        assert!(matches!(
            task.fail("late", 6),
            Err(TaskError::InvalidTransition {
                from: TaskStatus::Completed,
                to: TaskStatus::Failed,
                ..
            })
        ));
        assert!(task.update_step(0, StepStatus::Running, None, 7).is_err());
        assert!(task.cancel(8).is_err());
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[test]
    fn test_pending_task_promoted_by_step_update() {
        let mut task = research();
        task.status = TaskStatus::Pending;
        task.update_step(0, StepStatus::Running, None, 9).unwrap();
        assert_eq!(task.status, TaskStatus::Running);
    }

    #[test]
    fn test_terminal_age() {
        let mut task = research();
        assert_eq!(task.terminal_age_ms(10_000), None);
        task.cancel(4_000).unwrap();
        assert_eq!(task.terminal_age_ms(10_000), Some(6_000));
    }

    #[test]
    fn test_transition_table() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Cancelled.can_transition_to(TaskStatus::Cancelled));
    }

    #[test]
    fn test_serializes_camel_case() {
        let task = research();
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["taskId"], "t1");
        assert_eq!(json["totalSteps"], 3);
        assert_eq!(json["status"], "running");
        assert_eq!(json["steps"][0]["status"], "pending");
    }
}
