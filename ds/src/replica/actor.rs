//! Replica - actor that keeps a ConsumerStore in sync

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::messages::{ReplicaCommand, ReplicaError, ReplicaResponse, ReplicaStats};
use crate::domain::DashboardState;
use crate::events::SyncNotice;
use crate::persistence::{NoticeOutcome, PersistenceController};
use crate::store::{ApplyOutcome, ApplySource, ConsumerStore};

/// Handle to a running replica
pub struct Replica {
    tx: mpsc::Sender<ReplicaCommand>,
    store: ConsumerStore,
    persistence: PersistenceController,
    task: JoinHandle<()>,
}

impl Replica {
    /// Hydrate `store` from the cache, then start the reactive loop
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        store: ConsumerStore,
        persistence: PersistenceController,
        transport_rx: broadcast::Receiver<Arc<DashboardState>>,
    ) -> Self {
        debug!(sender_id = %persistence.sender_id(), "Replica::spawn: called");
        let hydrated = persistence.hydrate(&store);
        let notices = persistence.subscribe_notices();
        if notices.is_none() {
            info!("Sync channel unavailable, running without sibling reconciliation");
        }

        let (tx, rx) = mpsc::channel(32);
        let stats = ReplicaStats {
            hydrated,
            ..Default::default()
        };
        let task = tokio::spawn(actor_loop(
            store.clone(),
            persistence.clone(),
            rx,
            transport_rx,
            notices,
            stats,
        ));

        info!(hydrated, timestamp = store.timestamp(), "Replica spawned");
        Self {
            tx,
            store,
            persistence,
            task,
        }
    }

    /// Store fed by this replica; read it through its selectors
    pub fn store(&self) -> &ConsumerStore {
        &self.store
    }

    pub fn persistence(&self) -> &PersistenceController {
        &self.persistence
    }

    /// Document as seen by the actor, after everything queued before this call
    pub async fn snapshot(&self) -> ReplicaResponse<DashboardState> {
        debug!("snapshot: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ReplicaCommand::Snapshot { reply: reply_tx })
            .await
            .map_err(|_| ReplicaError::ChannelError)?;
        reply_rx.await.map_err(|_| ReplicaError::ChannelError)
    }

    /// Flush the pending save, stop the loop and return its stats
    pub async fn shutdown(self) -> ReplicaResponse<ReplicaStats> {
        debug!("shutdown: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ReplicaCommand::Shutdown { reply: reply_tx })
            .await
            .map_err(|_| ReplicaError::ChannelError)?;
        let stats = reply_rx.await.map_err(|_| ReplicaError::ChannelError)?;
        self.task.await.map_err(|e| ReplicaError::TaskFailed(e.to_string()))?;
        Ok(stats)
    }
}

/// Next sibling notice, or never when the channel is unavailable
async fn next_notice(notices: &mut Option<broadcast::Receiver<SyncNotice>>) -> Result<SyncNotice, RecvError> {
    match notices {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn actor_loop(
    store: ConsumerStore,
    persistence: PersistenceController,
    mut rx: mpsc::Receiver<ReplicaCommand>,
    mut transport_rx: broadcast::Receiver<Arc<DashboardState>>,
    mut notices: Option<broadcast::Receiver<SyncNotice>>,
    mut stats: ReplicaStats,
) {
    debug!("actor_loop: called");
    let mut transport_open = true;

    loop {
        // Documents and notices drain before commands so a snapshot or
        // shutdown sees everything already queued
        tokio::select! {
            biased;

            doc = transport_rx.recv(), if transport_open => match doc {
                Ok(doc) => {
                    let doc = Arc::unwrap_or_clone(doc);
                    match store.apply_incoming(doc, ApplySource::Transport) {
                        Ok(ApplyOutcome::Applied) => {
                            stats.transport_applied += 1;
                            persistence.schedule_save(store.snapshot());
                        }
                        Ok(ApplyOutcome::Stale) => stats.transport_stale += 1,
                        Err(e) => {
                            debug!(error = %e, "actor_loop: transport document rejected");
                            stats.rejected += 1;
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "actor_loop: transport receiver lagged");
                    stats.transport_lagged += skipped;
                }
                Err(RecvError::Closed) => {
                    debug!("actor_loop: transport closed");
                    transport_open = false;
                }
            },

            notice = next_notice(&mut notices) => match notice {
                Ok(notice) => match persistence.handle_notice(&notice, &store) {
                    NoticeOutcome::Applied => stats.sibling_applied += 1,
                    outcome => {
                        debug!(?outcome, sender = %notice.sender_id, "actor_loop: notice ignored");
                        stats.notices_ignored += 1;
                    }
                },
                Err(RecvError::Lagged(skipped)) => {
                    // A skipped notice may have announced a newer cache
                    debug!(skipped, "actor_loop: notice receiver lagged, re-reading cache");
                    stats.notices_lagged += skipped;
                    match persistence.catch_up(&store) {
                        NoticeOutcome::Applied => stats.sibling_applied += 1,
                        outcome => debug!(?outcome, "actor_loop: nothing newer after lag"),
                    }
                }
                Err(RecvError::Closed) => {
                    debug!("actor_loop: sync channel closed");
                    notices = None;
                }
            },

            cmd = rx.recv() => match cmd {
                Some(ReplicaCommand::Snapshot { reply }) => {
                    debug!("actor_loop: Snapshot command");
                    let _ = reply.send(store.snapshot());
                }
                Some(ReplicaCommand::Shutdown { reply }) => {
                    debug!("actor_loop: Shutdown command");
                    persistence.flush_pending();
                    let _ = reply.send(stats.clone());
                    break;
                }
                None => {
                    debug!("actor_loop: all handles dropped");
                    persistence.flush_pending();
                    break;
                }
            },
        }
    }

    info!(?stats, "Replica stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::PersistenceConfig;
    use crate::events::{DisabledChannel, InProcessChannel, SyncChannel};
    use crate::persistence::MemoryBackend;
    use crate::scheduler::TokioScheduler;
    use crate::transport::{BroadcastTransport, Transport};
    use std::time::Duration;

    fn controller(backend: &MemoryBackend, channel: Arc<dyn SyncChannel>) -> PersistenceController {
        PersistenceController::new(
            PersistenceConfig::default(),
            Arc::new(backend.clone()),
            channel,
            Arc::new(SystemClock),
            Arc::new(TokioScheduler::from_current().unwrap()),
        )
    }

    fn doc(timestamp: i64) -> DashboardState {
        DashboardState {
            timestamp,
            ..Default::default()
        }
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    #[tokio::test]
    async fn test_transport_documents_reach_store_and_cache() {
        let backend = MemoryBackend::new();
        let transport = BroadcastTransport::default();
        let replica = Replica::spawn(
            ConsumerStore::new(),
            controller(&backend, Arc::new(DisabledChannel)),
            transport.subscribe(),
        );

        let ts = now();
        transport.send(&doc(ts)).unwrap();
        transport.send(&doc(ts - 10)).unwrap();
        let snapshot = replica.snapshot().await.unwrap();
        assert_eq!(snapshot.timestamp, ts);
        assert!(replica.persistence().has_pending());

        let stats = replica.shutdown().await.unwrap();
        assert_eq!(stats.transport_applied, 1);
        assert_eq!(stats.transport_stale, 1);
        assert!(!stats.hydrated);
        assert!(!backend.is_empty());
    }

    #[tokio::test]
    async fn test_spawn_hydrates_from_cache() {
        let backend = MemoryBackend::new();
        let ts = now();
        controller(&backend, Arc::new(DisabledChannel)).save(&doc(ts));

        let transport = BroadcastTransport::default();
        let replica = Replica::spawn(
            ConsumerStore::new(),
            controller(&backend, Arc::new(DisabledChannel)),
            transport.subscribe(),
        );
        assert_eq!(replica.store().timestamp(), ts);
        assert!(replica.shutdown().await.unwrap().hydrated);
    }

    #[tokio::test]
    async fn test_sibling_notice_pulls_newer_cache() {
        let backend = MemoryBackend::new();
        let channel = Arc::new(InProcessChannel::default());
        let transport = BroadcastTransport::default();
        let replica = Replica::spawn(
            ConsumerStore::new(),
            controller(&backend, channel.clone()),
            transport.subscribe(),
        );

        let sibling = controller(&backend, channel.clone());
        let ts = now();
        assert!(sibling.save(&doc(ts)).is_saved());

        let store = replica.store().clone();
        tokio::time::timeout(Duration::from_secs(5), async {
            while store.timestamp() != ts {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("sibling state should be applied");

        let stats = replica.shutdown().await.unwrap();
        assert_eq!(stats.sibling_applied, 1);
    }

    #[tokio::test]
    async fn test_missed_notices_trigger_cache_reread() {
        let backend = MemoryBackend::new();
        let channel = Arc::new(InProcessChannel::new(1));
        let transport = BroadcastTransport::default();
        let replica = Replica::spawn(
            ConsumerStore::new(),
            controller(&backend, channel.clone()),
            transport.subscribe(),
        );

        // The sibling's notice is pushed out by an echo the replica ignores
        let sibling = controller(&backend, channel.clone());
        let ts = now();
        assert!(sibling.save(&doc(ts)).is_saved());
        channel
            .publish(SyncNotice::new(ts, replica.persistence().sender_id()))
            .unwrap();

        let snapshot = replica.snapshot().await.unwrap();
        assert_eq!(snapshot.timestamp, ts);

        let stats = replica.shutdown().await.unwrap();
        assert_eq!(stats.notices_lagged, 1);
        assert_eq!(stats.sibling_applied, 1);
        assert_eq!(stats.notices_ignored, 1);
    }
}
