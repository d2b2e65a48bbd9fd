//! Producer-to-consumer document delivery
//!
//! The emitter hands every flushed document to a `Transport`. The contract is
//! at-least-once delivery of the full document; ordering is not required
//! because consumer stores discard anything not newer than what they hold.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::DashboardState;

/// Default number of documents buffered per receiver
pub const DEFAULT_TRANSPORT_CAPACITY: usize = 256;

/// Errors delivering a document
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,

    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

/// Delivers flushed documents to consumers
pub trait Transport: Send + Sync {
    fn send(&self, doc: &DashboardState) -> Result<(), TransportError>;
}

/// In-process fan-out over a tokio broadcast channel
///
/// Each consumer replica subscribes and receives every document. Slow
/// receivers lag and skip documents, which is fine: the next flush carries
/// the full state.
#[derive(Clone)]
pub struct BroadcastTransport {
    tx: broadcast::Sender<Arc<DashboardState>>,
}

impl BroadcastTransport {
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "BroadcastTransport::new: called");
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DashboardState>> {
        debug!("BroadcastTransport::subscribe: new receiver");
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastTransport {
    fn default() -> Self {
        Self::new(DEFAULT_TRANSPORT_CAPACITY)
    }
}

impl Transport for BroadcastTransport {
    fn send(&self, doc: &DashboardState) -> Result<(), TransportError> {
        // No receivers is OK: nobody is watching yet
        match self.tx.send(Arc::new(doc.clone())) {
            Ok(receivers) => debug!(receivers, timestamp = doc.timestamp, "BroadcastTransport::send"),
            Err(_) => debug!(timestamp = doc.timestamp, "BroadcastTransport::send: no receivers"),
        }
        Ok(())
    }
}

#[derive(Default)]
struct Recorded {
    docs: Vec<DashboardState>,
    fail_next: usize,
}

/// Keeps every delivered document; can be told to fail
#[derive(Clone, Default)]
pub struct RecordingTransport {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` sends fail with `Unavailable`
    pub fn fail_next(&self, count: usize) {
        self.inner.lock().fail_next = count;
    }

    pub fn documents(&self) -> Vec<DashboardState> {
        self.inner.lock().docs.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last(&self) -> Option<DashboardState> {
        self.inner.lock().docs.last().cloned()
    }

    pub fn clear(&self) {
        self.inner.lock().docs.clear();
    }
}

impl Transport for RecordingTransport {
    fn send(&self, doc: &DashboardState) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(TransportError::Unavailable("injected failure".to_string()));
        }
        inner.docs.push(doc.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_every_receiver() {
        let transport = BroadcastTransport::new(8);
        let mut rx1 = transport.subscribe();
        let mut rx2 = transport.subscribe();
        assert_eq!(transport.receiver_count(), 2);

        let doc = DashboardState {
            timestamp: 42,
            ..Default::default()
        };
        transport.send(&doc).unwrap();

        assert_eq!(rx1.recv().await.unwrap().timestamp, 42);
        assert_eq!(rx2.recv().await.unwrap().timestamp, 42);
    }

    #[test]
    fn test_broadcast_without_receivers_is_ok() {
        let transport = BroadcastTransport::default();
        assert!(transport.send(&DashboardState::default()).is_ok());
    }

    #[test]
    fn test_recording_transport_failures() {
        let transport = RecordingTransport::new();
        transport.fail_next(1);
        assert!(transport.send(&DashboardState::default()).is_err());
        assert!(transport.send(&DashboardState::default()).is_ok());
        assert_eq!(transport.len(), 1);
    }
}
