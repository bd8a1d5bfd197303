//! Background retention sweeper.
//!
//! While running, the sweeper owns the queue that
//! [`DocumentStateStore::save`](crate::StateStore::save) pushes each saved
//! aggregate id and version onto, and applies the retention policy to each
//! one off the request path. The saved version is never swept.
//! Stopping detaches the queue from the store, drains what is already
//! queued, and waits for the task to exit. Saves made while no sweeper runs
//! fall back to detached one-off sweeps.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chronicle_types::AggregateId;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::document::DocumentStateStore;

/// Queue capacity used by [`RetentionSweeper::new`].
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

struct SweeperInner {
    store: DocumentStateStore,
    capacity: usize,
    swept: Arc<AtomicU64>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Start/stop handle for the retention sweep task.
#[derive(Clone)]
pub struct RetentionSweeper {
    inner: Arc<SweeperInner>,
}

impl RetentionSweeper {
    /// Create a stopped sweeper for `store`.
    pub fn new(store: DocumentStateStore) -> Self {
        Self::with_capacity(store, DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a stopped sweeper with a custom queue capacity.
    ///
    /// When the queue is full, further sweeps are skipped until it drains.
    pub fn with_capacity(store: DocumentStateStore, capacity: usize) -> Self {
        Self {
            inner: Arc::new(SweeperInner {
                store,
                capacity: capacity.max(1),
                swept: Arc::new(AtomicU64::new(0)),
                handle: Mutex::new(None),
            }),
        }
    }

    /// Attach the queue to the store and spawn the task. Does nothing if it
    /// is already running.
    pub fn start(&self) {
        let mut handle = self.inner.handle.lock();
        if handle.is_some() {
            return;
        }
        let (tx, mut rx) = mpsc::channel::<(AggregateId, u64)>(self.inner.capacity);
        self.inner.store.attach_sweeper(tx);

        let store = self.inner.store.clone();
        let swept = Arc::clone(&self.inner.swept);
        *handle = Some(tokio::spawn(async move {
            while let Some((aggregate_id, version)) = rx.recv().await {
                store.sweep_logged(&aggregate_id, version).await;
                swept.fetch_add(1, Ordering::AcqRel);
            }
        }));
        tracing::info!(capacity = self.inner.capacity, "Retention sweeper started");
    }

    /// Detach the queue, drain it, and wait for the task to exit.
    pub async fn stop(&self) {
        let handle = self.inner.handle.lock().take();
        if let Some(handle) = handle {
            self.inner.store.detach_sweeper();
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Retention sweeper ended abnormally");
            }
            tracing::info!(swept = self.swept(), "Retention sweeper stopped");
        }
    }

    /// Whether the task is running.
    pub fn is_running(&self) -> bool {
        self.inner.handle.lock().is_some()
    }

    /// Aggregates processed since creation.
    pub fn swept(&self) -> u64 {
        self.inner.swept.load(Ordering::Acquire)
    }
}

impl Drop for SweeperInner {
    fn drop(&mut self) {
        // Closing the queue lets a still-running task finish on its own.
        if self.handle.get_mut().is_some() {
            self.store.detach_sweeper();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chronicle_db::MemoryCollection;
    use chronicle_types::AggregateState;

    use super::*;
    use crate::document::StateStoreConfig;
    use crate::retention::RetentionConfig;
    use crate::store::{StateQueryStore, StateStore};

    async fn keep_two() -> DocumentStateStore {
        let config = StateStoreConfig {
            retention: RetentionConfig::KeepLast { count: 2 },
            ..StateStoreConfig::default()
        };
        DocumentStateStore::new(Arc::new(MemoryCollection::new("states")), config)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn queued_sweeps_drain_on_stop() {
        let store = keep_two().await;
        let sweeper = RetentionSweeper::new(store.clone());
        sweeper.start();
        assert!(sweeper.is_running());

        let id = AggregateId::new();
        for v in 1..=5 {
            store
                .save(&AggregateState::new(id, "guild", v, b"x".to_vec()))
                .await
                .unwrap();
        }
        sweeper.stop().await;
        assert!(!sweeper.is_running());
        assert_eq!(sweeper.swept(), 5);
        assert_eq!(store.count(&id).await.unwrap(), 2);
        assert!(store.exists(&id, 5).await.unwrap());
        assert!(store.exists(&id, 4).await.unwrap());
    }

    #[tokio::test]
    async fn queued_sweep_spares_the_version_just_saved() {
        let store = keep_two().await;
        let sweeper = RetentionSweeper::new(store.clone());
        sweeper.start();

        let id = AggregateId::new();
        for v in 3..=5 {
            store
                .save(&AggregateState::new(id, "guild", v, b"x".to_vec()))
                .await
                .unwrap();
        }
        sweeper.stop().await;
        assert_eq!(store.versions(&id).await.unwrap(), vec![4, 5]);

        // Rewriting an old version queues a sweep that must leave it in place.
        sweeper.start();
        store
            .save(&AggregateState::new(id, "guild", 1, b"x".to_vec()))
            .await
            .unwrap();
        sweeper.stop().await;
        assert!(store.exists(&id, 1).await.unwrap());
        assert!(store.exists(&id, 5).await.unwrap());
        assert!(store.exists(&id, 4).await.unwrap());
        assert!(!store.exists(&id, 3).await.unwrap());
    }

    #[tokio::test]
    async fn start_is_idempotent_and_restartable() {
        let store = keep_two().await;
        let sweeper = RetentionSweeper::new(store);
        sweeper.start();
        sweeper.start();
        sweeper.stop().await;
        sweeper.stop().await;
        sweeper.start();
        assert!(sweeper.is_running());
        sweeper.stop().await;
    }

    #[tokio::test]
    async fn failed_sweeps_are_counted_not_raised() {
        let collection = Arc::new(MemoryCollection::new("states"));
        let config = StateStoreConfig {
            retention: RetentionConfig::KeepLast { count: 1 },
            ..StateStoreConfig::default()
        };
        let store = DocumentStateStore::new(collection.clone(), config).await.unwrap();
        let sweeper = RetentionSweeper::new(store.clone());
        sweeper.start();

        let id = AggregateId::new();
        store
            .save(&AggregateState::new(id, "guild", 1, b"x".to_vec()))
            .await
            .unwrap();
        sweeper.stop().await;

        assert_eq!(store.stats().unwrap().sweeps, 1);

        collection.set_available(false);
        store.sweep_logged(&id, 1).await;
        assert_eq!(store.stats().unwrap().sweep_failures, 1);
    }
}
