//! Retention Maintenance
//!
//! Three independent background tasks over the log store:
//!
//! - **Expiry sweep**: periodically drops each topic's fully-expired sealed
//!   prefix from the segment list and queues the files for deletion at
//!   `created_at + retention + grace`.
//! - **Deferred deletion**: single consumer draining the deletion queue;
//!   waits out each entry's grace period, forces cache eviction, removes the
//!   file. Failures are logged and not retried — deletion is best effort and
//!   never affects correctness.
//! - **Lazy flush**: periodically flushes every topic's active mapping and
//!   syncs its file descriptor.
//!
//! A failure on one topic never blocks the others; the tasks stop together
//! through [`MaintenanceTasks::shutdown`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::log::LogStore;

pub struct MaintenanceTasks {
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl MaintenanceTasks {
    /// Start the sweep, deletion, and flush tasks for `store`.
    pub fn spawn(store: Arc<LogStore>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (delete_tx, delete_rx) = mpsc::unbounded_channel();

        let handles = vec![
            tokio::spawn(sweeper(store.clone(), delete_tx, shutdown_rx.clone())),
            tokio::spawn(remover(store.clone(), delete_rx, shutdown_rx.clone())),
            tokio::spawn(flusher(store, shutdown_rx)),
        ];
        Self {
            handles,
            shutdown_tx,
        }
    }

    /// Signal all tasks to stop and wait for them.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn sweeper(
    store: Arc<LogStore>,
    delete_tx: mpsc::UnboundedSender<(PathBuf, SystemTime)>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(store.config().sweep_interval());
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                for entry in store.sweep_expired(SystemTime::now()) {
                    if delete_tx.send(entry).is_err() {
                        return;
                    }
                }
            }
            _ = shutdown.changed() => return,
        }
    }
}

async fn remover(
    store: Arc<LogStore>,
    mut delete_rx: mpsc::UnboundedReceiver<(PathBuf, SystemTime)>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let (path, delete_at) = tokio::select! {
            entry = delete_rx.recv() => match entry {
                Some(entry) => entry,
                None => return,
            },
            _ = shutdown.changed() => return,
        };

        if let Ok(pending) = delete_at.duration_since(SystemTime::now()) {
            tokio::select! {
                _ = tokio::time::sleep(pending) => {}
                _ = shutdown.changed() => return,
            }
        }

        match store.purge_segment(&path) {
            Ok(()) => debug!(path = %path.display(), "deleted expired segment"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to delete segment"),
        }
    }
}

async fn flusher(store: Arc<LogStore>, mut shutdown: watch::Receiver<bool>) {
    let mut tick = tokio::time::interval(store.config().flush_interval());
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = tick.tick() => store.flush_active_segments(),
            _ = shutdown.changed() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use std::time::Duration;

    #[tokio::test]
    async fn test_expired_segments_deleted_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StorageConfig::new(dir.path());
        config.retention_ms = 100;
        config.deletion_grace_ms = 50;
        config.sweep_interval_ms = 20;
        config.segment_max_bytes = 512;
        config.segment_grow_bytes = 256;
        let store = Arc::new(LogStore::open(config).unwrap());

        for i in 0..10u8 {
            store.append("t", &vec![i; 100], None).await.unwrap();
        }
        let sealed_count = std::fs::read_dir(dir.path().join("t")).unwrap().count() - 1;
        assert!(sealed_count >= 1);

        let tasks = MaintenanceTasks::spawn(store.clone());
        // retention + grace + sweep cadence, with slack for CI.
        tokio::time::sleep(Duration::from_millis(600)).await;
        tasks.shutdown().await;

        // Only the active segment file remains; reads fast-forward.
        let remaining = std::fs::read_dir(dir.path().join("t")).unwrap().count();
        assert_eq!(remaining, 1);
        let (msg, next) = store.read_message("t", 0, false).unwrap();
        assert!(msg.is_none());
        assert_eq!(next, store.oldest_offset("t"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LogStore::open(StorageConfig::new(dir.path())).unwrap());
        let tasks = MaintenanceTasks::spawn(store);
        tasks.shutdown().await;
    }
}
