//! Consumer-side replica of the dashboard document
//!
//! A `ConsumerStore` accepts whole documents from the transport, the durable
//! cache or a sibling replica and keeps whichever carries the newest
//! timestamp. Everything else reads through the selectors.

mod consumer;

pub use consumer::{ApplyOutcome, ApplySource, ConsumerStore, StoreError, StoreEvent};
