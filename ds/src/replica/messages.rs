//! Replica messages
//!
//! Commands and responses for the replica actor.

use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::DashboardState;

/// Errors talking to a replica
#[derive(Debug, Error)]
pub enum ReplicaError {
    #[error("Replica channel closed")]
    ChannelError,

    #[error("Replica task failed: {0}")]
    TaskFailed(String),
}

/// Response from replica operations
pub type ReplicaResponse<T> = Result<T, ReplicaError>;

/// What the replica loop has processed so far
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplicaStats {
    pub transport_applied: u64,
    pub transport_stale: u64,
    pub transport_lagged: u64,
    pub sibling_applied: u64,
    pub notices_ignored: u64,
    pub notices_lagged: u64,
    pub rejected: u64,
    pub hydrated: bool,
}

/// Commands sent to the replica actor
#[derive(Debug)]
pub enum ReplicaCommand {
    /// Flush the pending save and stop
    Shutdown { reply: oneshot::Sender<ReplicaStats> },
    Snapshot { reply: oneshot::Sender<DashboardState> },
}
