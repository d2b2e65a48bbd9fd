//! Consumer replica actor
//!
//! One tokio task per consumer. It owns the reactive loop that feeds a
//! `ConsumerStore` from the transport and from sibling notices, and keeps
//! the durable cache up to date.

mod actor;
mod messages;

pub use actor::Replica;
pub use messages::{ReplicaCommand, ReplicaError, ReplicaResponse, ReplicaStats};
