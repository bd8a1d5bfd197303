//! The [`StateStore`] capability and its optional query and metrics
//! extensions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chronicle_db::DbError;
use chronicle_types::{AggregateId, AggregateState, StateSummary, StoreError, StoreResult};

use crate::metrics::StorageMetrics;

/// Versioned snapshot persistence.
///
/// One row exists per `(aggregate_id, version)`. Saving an existing version
/// overwrites it. Payloads come back byte-identical to what was saved,
/// whatever transforms the store applies in between.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Persist a snapshot, overwriting the same version if present.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Validation`] for a nil id or empty type, before I/O
    /// - [`StoreError::CompressionFailed`] / [`StoreError::EncryptionFailed`]
    /// - backend errors
    async fn save(&self, state: &AggregateState) -> StoreResult<()>;

    /// The highest stored version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the aggregate has no snapshot.
    async fn load(&self, aggregate_id: &AggregateId) -> StoreResult<AggregateState>;

    /// Exactly the snapshot saved at `version`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when that version is absent.
    async fn load_version(
        &self,
        aggregate_id: &AggregateId,
        version: u64,
    ) -> StoreResult<AggregateState>;

    /// Remove one version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when that version is absent.
    async fn delete(&self, aggregate_id: &AggregateId, version: u64) -> StoreResult<()>;

    /// Remove every version, returning how many rows went.
    async fn delete_all(&self, aggregate_id: &AggregateId) -> StoreResult<u64>;

    /// Payload-free summaries of every version, newest first.
    async fn list(&self, aggregate_id: &AggregateId) -> StoreResult<Vec<StateSummary>>;

    /// Number of stored versions.
    async fn count(&self, aggregate_id: &AggregateId) -> StoreResult<u64>;

    /// Whether `version` is stored.
    async fn exists(&self, aggregate_id: &AggregateId, version: u64) -> StoreResult<bool>;

    /// Stop background work and release resources.
    async fn close(&self) -> StoreResult<()>;
}

/// Filter for [`StateQueryStore::query`].
///
/// Empty sets and `None` bounds mean "any". Results are ordered by
/// aggregate type, aggregate id, then version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateQuery {
    /// Restrict to these aggregate types.
    pub aggregate_types: Vec<String>,
    /// Restrict to these aggregates.
    pub aggregate_ids: Vec<AggregateId>,
    /// Lowest version, inclusive.
    pub min_version: Option<u64>,
    /// Highest version, inclusive.
    pub max_version: Option<u64>,
    /// Snapshots taken at or after this instant.
    pub from: Option<DateTime<Utc>>,
    /// Snapshots taken strictly before this instant.
    pub to: Option<DateTime<Utc>>,
    /// Maximum number of rows returned.
    pub limit: Option<usize>,
    /// Number of matching rows skipped.
    pub offset: usize,
}

/// Cross-aggregate lookups.
#[async_trait]
pub trait StateQueryStore: StateStore {
    /// Snapshots matching `query`, decoded.
    async fn query(&self, query: &StateQuery) -> StoreResult<Vec<AggregateState>>;

    /// Every aggregate type with at least one snapshot, sorted.
    async fn aggregate_types(&self) -> StoreResult<Vec<String>>;

    /// Every stored version of one aggregate, ascending.
    async fn versions(&self, aggregate_id: &AggregateId) -> StoreResult<Vec<u64>>;
}

/// Storage accounting.
#[async_trait]
pub trait StateMetricsStore: StateStore {
    /// Metrics over the whole store, or over one aggregate.
    async fn storage_metrics(&self, scope: Option<&AggregateId>) -> StoreResult<StorageMetrics>;
}

/// Convert a backend error, naming the operation that failed.
pub(crate) fn db_error(operation: &'static str) -> impl FnOnce(DbError) -> StoreError {
    move |err| StoreError::from(err).with_operation(operation)
}
