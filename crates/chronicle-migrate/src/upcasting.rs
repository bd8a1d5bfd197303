//! Lazy upgrading on read.

use std::sync::Arc;

use async_trait::async_trait;
use chronicle_events::EventStore;
use chronicle_types::{AggregateId, Event, StorageStrategy, StoreResult};

use crate::upgrader::EventUpgrader;

/// Wraps an [`EventStore`] so loaded events come back at their newest
/// payload shape. Stored data is left as written; writes pass through.
#[derive(Clone)]
pub struct UpcastingEventStore {
    inner: Arc<dyn EventStore>,
    upgrader: EventUpgrader,
}

impl UpcastingEventStore {
    /// Wrap `inner`.
    pub fn new(inner: Arc<dyn EventStore>, upgrader: EventUpgrader) -> Self {
        Self { inner, upgrader }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &Arc<dyn EventStore> {
        &self.inner
    }

    fn upcast(&self, events: Vec<Event>) -> StoreResult<Vec<Event>> {
        if self.upgrader.is_empty() {
            return Ok(events);
        }
        events
            .into_iter()
            .map(|event| self.upgrader.upgrade_event(event))
            .collect()
    }
}

#[async_trait]
impl EventStore for UpcastingEventStore {
    async fn save(&self, events: &[Event], expected_version: u64) -> StoreResult<()> {
        self.inner.save(events, expected_version).await
    }

    async fn load(&self, aggregate_id: &AggregateId) -> StoreResult<Vec<Event>> {
        let events = self.inner.load(aggregate_id).await?;
        self.upcast(events)
    }

    async fn load_from(
        &self,
        aggregate_id: &AggregateId,
        from_version: u64,
    ) -> StoreResult<Vec<Event>> {
        let events = self.inner.load_from(aggregate_id, from_version).await?;
        self.upcast(events)
    }

    async fn current_version(&self, aggregate_id: &AggregateId) -> StoreResult<u64> {
        self.inner.current_version(aggregate_id).await
    }

    async fn aggregate_ids(&self) -> StoreResult<Vec<AggregateId>> {
        self.inner.aggregate_ids().await
    }

    fn strategy(&self) -> StorageStrategy {
        self.inner.strategy()
    }

    async fn close(&self) -> StoreResult<()> {
        self.inner.close().await
    }
}
