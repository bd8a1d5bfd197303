//! The [`EventStore`] capability shared by every strategy.

use async_trait::async_trait;
use chronicle_db::DbError;
use chronicle_types::{AggregateId, Event, StorageStrategy, StoreError, StoreResult};

/// Append-only event persistence with optimistic concurrency.
///
/// `save` is atomic: every event in the batch is appended or none is. The
/// batch must continue the stream at `expected_version + 1`, and
/// `expected_version` must equal the last persisted version at the instant
/// of the write; otherwise the call fails with
/// [`StoreError::ConcurrencyConflict`] and nothing is stored. This is the
/// only concurrency control. Callers racing on one aggregate retry with a
/// freshly read version.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append `events` on top of `expected_version` (0 for a new stream).
    ///
    /// An empty batch is a no-op.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Validation`] / [`StoreError::InvalidVersion`] for a
    ///   malformed batch, before any I/O
    /// - [`StoreError::ConcurrencyConflict`] when the stored version differs
    /// - [`StoreError::StoreUnavailable`] / [`StoreError::Cancelled`] for
    ///   backend failures
    async fn save(&self, events: &[Event], expected_version: u64) -> StoreResult<()>;

    /// All events of an aggregate in version order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the aggregate has no events.
    async fn load(&self, aggregate_id: &AggregateId) -> StoreResult<Vec<Event>> {
        let events = self.load_from(aggregate_id, 1).await?;
        if events.is_empty() {
            return Err(StoreError::not_found("stream", aggregate_id));
        }
        Ok(events)
    }

    /// Events with `version >= from_version`, in version order.
    ///
    /// Returns an empty list when `from_version` is past the head or the
    /// aggregate is unknown.
    async fn load_from(&self, aggregate_id: &AggregateId, from_version: u64)
    -> StoreResult<Vec<Event>>;

    /// The last persisted version, or 0 for an unknown aggregate.
    async fn current_version(&self, aggregate_id: &AggregateId) -> StoreResult<u64>;

    /// Every aggregate with at least one stored event.
    async fn aggregate_ids(&self) -> StoreResult<Vec<AggregateId>>;

    /// Which strategy this store implements.
    fn strategy(&self) -> StorageStrategy;

    /// Stop background work and release resources.
    async fn close(&self) -> StoreResult<()>;
}

/// Convert a backend error, naming the operation that failed.
pub(crate) fn db_error(operation: &'static str) -> impl FnOnce(DbError) -> StoreError {
    move |err| StoreError::from(err).with_operation(operation)
}

/// Parse aggregate ids returned by a `distinct` query, skipping garbage.
pub(crate) fn parse_aggregate_ids(values: Vec<serde_json::Value>) -> Vec<AggregateId> {
    values
        .into_iter()
        .filter_map(|value| {
            let raw = value.as_str()?;
            match raw.parse() {
                Ok(id) => Some(id),
                Err(_) => {
                    tracing::warn!(value = raw, "Skipping malformed aggregate id");
                    None
                }
            }
        })
        .collect()
}

/// Order events by version and drop duplicate versions, keeping the first.
pub(crate) fn sort_dedup(mut events: Vec<Event>) -> Vec<Event> {
    events.sort_by_key(|e| e.version);
    events.dedup_by_key(|e| e.version);
    events
}

/// Convert a `u64` version into the signed integer documents compare on.
pub(crate) fn version_i64(aggregate_id: &AggregateId, version: u64) -> StoreResult<i64> {
    i64::try_from(version).map_err(|e| StoreError::InvalidVersion {
        aggregate_id: aggregate_id.to_string(),
        version,
        reason: format!("version exceeds the storable range: {e}"),
    })
}
