//! Durable cache of the consumer's document
//!
//! The `PersistenceController` writes a stripped, optionally gzip-compressed
//! copy of the document to a `StorageBackend`, reloads it within its TTL and
//! tells sibling replicas about fresh writes through a `SyncChannel`.
//!
//! ```text
//! ConsumerStore ──schedule_save──► PersistenceController ──write──► StorageBackend
//!                                        │
//!                                        └──publish(SyncNotice)──► SyncChannel ──► siblings
//! ```

mod backend;
mod codec;
mod controller;
mod errors;

pub use backend::{BackendError, FileBackend, MemoryBackend, StorageBackend};
pub(crate) use backend::atomic_write;
pub use codec::{compress, decompress, is_gzip};
pub use controller::{NoticeOutcome, PersistenceController, SaveOutcome, state_key};
pub use errors::PersistenceError;
