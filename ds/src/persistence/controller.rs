//! PersistenceController - TTL, compression, size cap and sibling notices

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::backend::StorageBackend;
use super::codec;
use super::errors::PersistenceError;
use crate::clock::Clock;
use crate::config::PersistenceConfig;
use crate::domain::{DashboardState, is_supported_schema};
use crate::events::{SyncChannel, SyncNotice};
use crate::scheduler::Scheduler;
use crate::store::{ApplyOutcome, ApplySource, ConsumerStore};

/// Key of the persisted document for a namespace
///
/// The record is a single value: JSON, or gzip-compressed JSON recognised by
/// its header.
pub fn state_key(namespace: &str) -> String {
    format!("{namespace}/state")
}

/// Result of a save attempt
#[derive(Debug)]
pub enum SaveOutcome {
    Saved { bytes: usize, compressed: bool },
    Rejected(PersistenceError),
}

impl SaveOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved { .. })
    }
}

/// What `handle_notice` did with a sibling's notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeOutcome {
    /// The notice came from this controller
    OwnEcho,
    /// The store already holds something at least as new
    NotNewer,
    /// The cached document was loaded into the store
    Applied,
    /// Nothing usable in the cache
    Unavailable,
}

struct ControllerInner {
    config: PersistenceConfig,
    backend: Arc<dyn StorageBackend>,
    channel: Arc<dyn SyncChannel>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    sender_id: String,
    state_key: String,
    pending: Mutex<Option<DashboardState>>,
    last_saved_timestamp: Mutex<Option<i64>>,
}

/// Durable cache for one consumer replica
///
/// Clones share the pending save and sender id.
#[derive(Clone)]
pub struct PersistenceController {
    inner: Arc<ControllerInner>,
}

impl PersistenceController {
    pub fn new(
        config: PersistenceConfig,
        backend: Arc<dyn StorageBackend>,
        channel: Arc<dyn SyncChannel>,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let sender_id = Uuid::now_v7().to_string();
        debug!(%sender_id, namespace = %config.namespace, "PersistenceController::new: called");
        Self {
            inner: Arc::new(ControllerInner {
                state_key: state_key(&config.namespace),
                config,
                backend,
                channel,
                clock,
                scheduler,
                sender_id,
                pending: Mutex::new(None),
                last_saved_timestamp: Mutex::new(None),
            }),
        }
    }

    /// Identifier stamped on this controller's notices
    pub fn sender_id(&self) -> &str {
        &self.inner.sender_id
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.inner.config
    }

    /// Timestamp of the last document written successfully
    pub fn last_saved_timestamp(&self) -> Option<i64> {
        *self.inner.last_saved_timestamp.lock()
    }

    // === Save ===

    /// Write `state` now without its transient fields
    pub fn save(&self, state: &DashboardState) -> SaveOutcome {
        let inner = &self.inner;
        let stripped = state.without_transient();
        let json = match serde_json::to_vec(&stripped) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "save: serialization failed");
                return SaveOutcome::Rejected(PersistenceError::Serialization(e));
            }
        };

        let (payload, compressed) = if json.len() > inner.config.compression_threshold_bytes {
            match codec::compress(&json) {
                Ok(packed) => {
                    debug!(raw = json.len(), packed = packed.len(), "save: compressed payload");
                    (packed, true)
                }
                Err(e) => {
                    warn!(error = %PersistenceError::CompressionFailure(e), "save: storing uncompressed");
                    (json, false)
                }
            }
        } else {
            (json, false)
        };

        if payload.len() > inner.config.max_state_size_bytes {
            let err = PersistenceError::QuotaExceeded {
                size: payload.len(),
                max: inner.config.max_state_size_bytes,
            };
            warn!(error = %err, timestamp = state.timestamp, "save: state too large, not persisted");
            return SaveOutcome::Rejected(err);
        }

        if let Err(e) = inner.backend.write(&inner.state_key, &payload) {
            let e = PersistenceError::from(e);
            warn!(error = %e, timestamp = state.timestamp, "save: backend write failed");
            return SaveOutcome::Rejected(e);
        }

        *inner.last_saved_timestamp.lock() = Some(state.timestamp);
        debug!(bytes = payload.len(), compressed, timestamp = state.timestamp, "save: persisted");

        let notice = SyncNotice::new(state.timestamp, inner.sender_id.clone());
        if let Err(e) = inner.channel.publish(notice) {
            debug!(error = %e, "save: sync notice not published");
        }

        SaveOutcome::Saved {
            bytes: payload.len(),
            compressed,
        }
    }

    /// Save `state` after the persistence debounce; a newer call replaces it
    pub fn schedule_save(&self, state: DashboardState) {
        debug!(timestamp = state.timestamp, "schedule_save: called");
        // Arming under the pending lock keeps the slot and the timer in step
        let mut pending = self.inner.pending.lock();
        *pending = Some(state);
        let weak = Arc::downgrade(&self.inner);
        self.inner.scheduler.arm(
            self.inner.config.debounce(),
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    PersistenceController { inner }.save_fired();
                }
            }),
        );
    }

    /// Write the pending state now, if any
    pub fn flush_pending(&self) -> Option<SaveOutcome> {
        let pending = {
            let mut slot = self.inner.pending.lock();
            let pending = slot.take()?;
            self.inner.scheduler.disarm();
            pending
        };
        debug!(timestamp = pending.timestamp, "flush_pending: writing pending state");
        Some(self.save(&pending))
    }

    /// Timer callback: the timer that fired is already spent, so nothing is disarmed
    fn save_fired(&self) -> Option<SaveOutcome> {
        let pending = self.inner.pending.lock().take()?;
        debug!(timestamp = pending.timestamp, "save_fired: writing pending state");
        Some(self.save(&pending))
    }

    pub fn has_pending(&self) -> bool {
        self.inner.pending.lock().is_some()
    }

    // === Load ===

    /// Load the cached document, logging and absorbing any error
    pub fn load(&self) -> Option<DashboardState> {
        match self.try_load() {
            Ok(state) => state,
            Err(e @ PersistenceError::StaleState { .. }) => {
                debug!(error = %e, "load: cached state expired");
                None
            }
            Err(e) => {
                warn!(error = %e, "load: cached state unusable");
                None
            }
        }
    }

    /// Load the cached document; `Ok(None)` when nothing is stored
    ///
    /// Corrupt and expired records are removed. A record with an unknown
    /// schema version is left in place for whichever version wrote it.
    pub fn try_load(&self) -> Result<Option<DashboardState>, PersistenceError> {
        let inner = &self.inner;
        let Some(raw) = inner.backend.read(&inner.state_key)? else {
            debug!(key = %inner.state_key, "try_load: nothing cached");
            return Ok(None);
        };
        let compressed = codec::is_gzip(&raw);

        let json = if compressed {
            match codec::decompress(&raw) {
                Ok(json) => json,
                Err(e) => return Err(self.discard_corrupt(format!("decompression failed: {e}"))),
            }
        } else {
            raw
        };

        let value: serde_json::Value = match serde_json::from_slice(&json) {
            Ok(value) => value,
            Err(e) => return Err(self.discard_corrupt(format!("invalid JSON: {e}"))),
        };

        let found = value
            .get("schemaVersion")
            .and_then(serde_json::Value::as_u64)
            .and_then(|v| u32::try_from(v).ok());
        match found {
            Some(version) if is_supported_schema(version) => {}
            Some(version) => return Err(PersistenceError::SchemaMismatch { found: version }),
            None => return Err(self.discard_corrupt("missing schemaVersion".to_string())),
        }

        let state: DashboardState = match serde_json::from_value(value) {
            Ok(state) => state,
            Err(e) => return Err(self.discard_corrupt(format!("unexpected shape: {e}"))),
        };
        if let Err(e) = state.validate(inner.config.max_active_tasks) {
            return Err(self.discard_corrupt(format!("invalid document: {e}")));
        }

        let age_ms = inner.clock.now_ms().saturating_sub(state.timestamp);
        let ttl_ms = inner.config.state_ttl_ms;
        if age_ms > i64::try_from(ttl_ms).unwrap_or(i64::MAX) {
            self.clear();
            return Err(PersistenceError::StaleState { age_ms, ttl_ms });
        }

        debug!(timestamp = state.timestamp, age_ms, compressed, "try_load: loaded cached state");
        Ok(Some(state.without_transient()))
    }

    fn discard_corrupt(&self, reason: String) -> PersistenceError {
        self.clear();
        PersistenceError::CorruptPersistedRecord(reason)
    }

    /// Remove the record
    pub fn clear(&self) {
        let inner = &self.inner;
        if let Err(e) = inner.backend.remove(&inner.state_key) {
            warn!(key = %inner.state_key, error = %e, "clear: remove failed");
        }
        debug!(namespace = %inner.config.namespace, "clear: cache cleared");
    }

    // === Replica integration ===

    /// Notices from siblings sharing this controller's channel
    pub fn subscribe_notices(&self) -> Option<tokio::sync::broadcast::Receiver<SyncNotice>> {
        self.inner.channel.subscribe()
    }

    /// Seed an empty store from the cache; returns whether anything was applied
    pub fn hydrate(&self, store: &ConsumerStore) -> bool {
        let Some(state) = self.load() else {
            return false;
        };
        let timestamp = state.timestamp;
        match store.apply_incoming(state, ApplySource::Persistence) {
            Ok(ApplyOutcome::Applied) => {
                info!(timestamp, "Hydrated from durable cache");
                true
            }
            Ok(ApplyOutcome::Stale) => false,
            Err(e) => {
                warn!(error = %e, "hydrate: cached state rejected");
                false
            }
        }
    }

    /// React to a sibling's notice by re-reading the shared cache
    pub fn handle_notice(&self, notice: &SyncNotice, store: &ConsumerStore) -> NoticeOutcome {
        if notice.sender_id == self.inner.sender_id {
            return NoticeOutcome::OwnEcho;
        }
        if notice.timestamp <= store.timestamp() {
            debug!(
                notice = notice.timestamp,
                current = store.timestamp(),
                "handle_notice: already up to date"
            );
            return NoticeOutcome::NotNewer;
        }
        debug!(sender = %notice.sender_id, "handle_notice: re-reading cache");
        self.catch_up(store)
    }

    /// Apply whatever the shared cache holds if it is newer than `store`
    ///
    /// Used when notices may have been missed.
    pub fn catch_up(&self, store: &ConsumerStore) -> NoticeOutcome {
        let Some(state) = self.load() else {
            debug!("catch_up: nothing loadable");
            return NoticeOutcome::Unavailable;
        };
        match store.apply_incoming(state, ApplySource::Sibling) {
            Ok(ApplyOutcome::Applied) => {
                debug!(timestamp = store.timestamp(), "catch_up: applied sibling state");
                NoticeOutcome::Applied
            }
            Ok(ApplyOutcome::Stale) => NoticeOutcome::NotNewer,
            Err(e) => {
                warn!(error = %e, "catch_up: sibling state rejected");
                NoticeOutcome::Unavailable
            }
        }
    }
}
