//! Persistence error types

use thiserror::Error;

use super::backend::BackendError;

/// Why a save or load did not produce a usable record
///
/// These never escape the controller's public save/load paths; they are
/// logged and reported through `SaveOutcome` or `try_load`.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Persisted schema version {found} is not supported")]
    SchemaMismatch { found: u32 },

    #[error("Persisted state is {age_ms} ms old (ttl {ttl_ms} ms)")]
    StaleState { age_ms: i64, ttl_ms: u64 },

    #[error("Persisted record is corrupt: {0}")]
    CorruptPersistedRecord(String),

    #[error("Serialized state is {size} bytes, limit is {max}")]
    QuotaExceeded { size: usize, max: usize },

    #[error("Compression failed: {0}")]
    CompressionFailure(#[source] std::io::Error),

    #[error("Storage backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
