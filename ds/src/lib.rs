//! dashsync - shared dashboard state synchronization
//!
//! A producer owns one canonical, versioned dashboard document and streams
//! it to any number of consumer replicas. Task progress is published the
//! moment it changes; everything else is coalesced behind a short debounce.
//! Consumers keep the newest document they have seen, cache it durably and
//! pick up fresher copies written by sibling replicas.
//!
//! # Modules
//!
//! - [`domain`] - The document, its bounded feeds and the task state machine
//! - [`emitter`] - Producer-side mutation API and flush scheduling
//! - [`store`] - Consumer-side last-writer-wins replica with selectors
//! - [`persistence`] - Durable cache with TTL, compression and size cap
//! - [`events`] - Sibling notices between replicas
//! - [`replica`] - Actor wiring a store to its transport, cache and siblings
//! - [`transport`] - Producer-to-consumer document delivery
//! - [`scheduler`] - Debounce timers (tokio-backed and virtual)
//! - [`config`] - Configuration types and loading

pub mod cli;
pub mod clock;
pub mod config;
pub mod domain;
pub mod emitter;
pub mod events;
pub mod persistence;
pub mod replica;
pub mod scheduler;
pub mod store;
pub mod transport;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, EmitterConfig, PersistenceConfig};
pub use domain::{
    Alert, AlertLevel, DashboardState, ProjectRef, StepStatus, TaskProgress, TaskStatus, TaskStep, WidgetsState,
};
pub use emitter::{Emitter, EmitterError, EmitterMetrics, FlushKind};
pub use events::{DisabledChannel, InProcessChannel, SyncChannel, SyncNotice, VersionFileChannel};
pub use persistence::{
    FileBackend, MemoryBackend, NoticeOutcome, PersistenceController, PersistenceError, SaveOutcome, StorageBackend,
};
pub use replica::{Replica, ReplicaStats};
pub use scheduler::{ManualScheduler, Scheduler, TokioScheduler};
pub use store::{ApplyOutcome, ApplySource, ConsumerStore, StoreError, StoreEvent};
pub use transport::{BroadcastTransport, RecordingTransport, Transport, TransportError};
