//! Channel trait and the in-process implementations

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use super::SyncNotice;

/// Default notices buffered per subscriber
pub const DEFAULT_NOTICE_CAPACITY: usize = 64;

/// Errors publishing a notice
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Sync channel unavailable")]
    Unavailable,

    #[error("Sync channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sync notice encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Best-effort fan-out of `SyncNotice`s between replicas
pub trait SyncChannel: Send + Sync {
    fn publish(&self, notice: SyncNotice) -> Result<(), ChannelError>;

    /// `None` when the channel cannot deliver notices at all
    fn subscribe(&self) -> Option<broadcast::Receiver<SyncNotice>>;
}

/// Replicas in the same process sharing one tokio broadcast bus
///
/// Every subscriber, the publisher included, receives every notice; the
/// sender id lets a replica recognize its own echo.
#[derive(Clone)]
pub struct InProcessChannel {
    tx: broadcast::Sender<SyncNotice>,
}

impl InProcessChannel {
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "InProcessChannel::new: creating channel");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for InProcessChannel {
    fn default() -> Self {
        Self::new(DEFAULT_NOTICE_CAPACITY)
    }
}

impl SyncChannel for InProcessChannel {
    fn publish(&self, notice: SyncNotice) -> Result<(), ChannelError> {
        debug!(timestamp = notice.timestamp, sender = %notice.sender_id, "InProcessChannel::publish");
        // Nobody listening is fine
        let _ = self.tx.send(notice);
        Ok(())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<SyncNotice>> {
        Some(self.tx.subscribe())
    }
}

/// No sibling reconciliation
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledChannel;

impl SyncChannel for DisabledChannel {
    fn publish(&self, _notice: SyncNotice) -> Result<(), ChannelError> {
        Err(ChannelError::Unavailable)
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<SyncNotice>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_process_delivers_to_all_subscribers() {
        let channel = InProcessChannel::default();
        let mut a = channel.subscribe().unwrap();
        let mut b = channel.subscribe().unwrap();
        assert_eq!(channel.subscriber_count(), 2);

        channel.publish(SyncNotice::new(5, "one")).unwrap();
        assert_eq!(a.try_recv().unwrap().timestamp, 5);
        assert_eq!(b.try_recv().unwrap().sender_id, "one");
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let channel = InProcessChannel::default();
        assert!(channel.publish(SyncNotice::new(1, "x")).is_ok());
    }

    #[test]
    fn test_disabled_channel() {
        let channel = DisabledChannel;
        assert!(channel.subscribe().is_none());
        assert!(matches!(
            channel.publish(SyncNotice::new(1, "x")),
            Err(ChannelError::Unavailable)
        ));
    }
}
