//! Emitter errors
//!
//! Every variant is a rejected call: the canonical state is unchanged.

use thiserror::Error;

use crate::domain::{TaskError, TaskStatus, ValidationError};

/// Caller-visible rejections from the mutation API
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmitterError {
    #[error("Task already exists: {0}")]
    DuplicateTask(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Step {step_index} not found in task {task_id}")]
    StepNotFound { task_id: String, step_index: usize },

    #[error("Active task limit reached ({max}) and no finished task can be evicted")]
    CapacityExceeded { max: usize },

    #[error("Task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Seed document is invalid: {0}")]
    InvalidState(#[from] ValidationError),
}

impl From<TaskError> for EmitterError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::StepNotFound { task_id, step_index } => Self::StepNotFound { task_id, step_index },
            TaskError::InvalidTransition { task_id, from, to } => Self::InvalidTransition { task_id, from, to },
        }
    }
}
