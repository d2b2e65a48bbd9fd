//! Dashboard state model
//!
//! The versioned document, its bounded collections and the task progress
//! state machine.

mod bounded;
mod dashboard;
mod task;

pub use bounded::BoundedList;
pub use dashboard::{
    ActivityEntry, Alert, AlertLevel, CURRENT_SCHEMA_VERSION, DEFAULT_ACTIVITY_CAPACITY, DEFAULT_ALERT_CAPACITY,
    DashboardState, LoadingState, ProjectRef, SUPPORTED_SCHEMA_VERSIONS, ValidationError, WidgetsState,
    is_supported_schema,
};
pub use task::{StepStatus, TaskError, TaskProgress, TaskStatus, TaskStep};
