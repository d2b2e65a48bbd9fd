//! Cross-process notices through a polled file
//!
//! The publisher overwrites a small JSON file with the latest notice; every
//! subscriber polls it and forwards notices it has not seen yet.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::SyncNotice;
use super::channel::{ChannelError, DEFAULT_NOTICE_CAPACITY, SyncChannel};
use crate::persistence::atomic_write;

/// How often subscribers re-read the notice file
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Sync channel for replicas in separate processes sharing one directory
#[derive(Debug, Clone)]
pub struct VersionFileChannel {
    path: PathBuf,
    poll_interval: Duration,
}

impl VersionFileChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_poll_interval(path, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        let path = path.into();
        debug!(path = %path.display(), ?poll_interval, "VersionFileChannel::new: called");
        Self { path, poll_interval }
    }

    /// Notice file inside a cache directory
    pub fn in_dir(dir: &Path, namespace: &str) -> Self {
        Self::new(dir.join(format!(".{namespace}.sync_version")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Latest notice on disk, if any can be parsed
    pub fn read_latest(&self) -> Option<SyncNotice> {
        read_notice(&self.path)
    }
}

fn read_notice(path: &Path) -> Option<SyncNotice> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(content.trim()) {
        Ok(notice) => Some(notice),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "read_notice: unparseable notice file");
            None
        }
    }
}

impl SyncChannel for VersionFileChannel {
    fn publish(&self, notice: SyncNotice) -> Result<(), ChannelError> {
        debug!(timestamp = notice.timestamp, path = %self.path.display(), "VersionFileChannel::publish");
        let json = serde_json::to_string(&notice)?;
        atomic_write(&self.path, json.as_bytes())?;
        Ok(())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<SyncNotice>> {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "VersionFileChannel::subscribe: no runtime, sibling sync disabled");
                return None;
            }
        };

        let (tx, rx) = broadcast::channel(DEFAULT_NOTICE_CAPACITY);
        let path = self.path.clone();
        let poll_interval = self.poll_interval;
        // Only notices written after subscribing are forwarded
        let mut last_seen = read_notice(&path);

        handle.spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                ticker.tick().await;
                if let Some(notice) = read_notice(&path).filter(|n| Some(n) != last_seen.as_ref()) {
                    last_seen = Some(notice.clone());
                    if tx.send(notice).is_err() {
                        debug!(path = %path.display(), "VersionFileChannel: subscriber gone, stopping poller");
                        break;
                    }
                }
                if tx.receiver_count() == 0 {
                    break;
                }
            }
        });

        Some(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_publish_overwrites_latest() {
        let dir = TempDir::new().unwrap();
        let channel = VersionFileChannel::in_dir(dir.path(), "default");
        assert!(channel.read_latest().is_none());

        channel.publish(SyncNotice::new(1, "a")).unwrap();
        channel.publish(SyncNotice::new(2, "b")).unwrap();
        assert_eq!(channel.read_latest(), Some(SyncNotice::new(2, "b")));
    }

    #[test]
    fn test_subscribe_without_runtime_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let channel = VersionFileChannel::in_dir(dir.path(), "default");
        assert!(channel.subscribe().is_none());
    }

    #[tokio::test]
    async fn test_subscriber_sees_notices_from_another_writer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notice.json");
        let reader = VersionFileChannel::with_poll_interval(&path, Duration::from_millis(10));
        let writer = VersionFileChannel::new(&path);

        let mut rx = reader.subscribe().unwrap();
        writer.publish(SyncNotice::new(77, "other")).unwrap();

        let notice = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("poller should forward the notice")
            .unwrap();
        assert_eq!(notice, SyncNotice::new(77, "other"));
    }
}
