//! Document strategy: one row per event.
//!
//! Rows are unique on `(aggregateId, version)`. A save reads the current
//! maximum version and inserts the batch inside one guarded write, so a
//! batch spanning many rows is still all-or-nothing. Because every event is
//! its own row, this strategy also answers filtered queries across
//! aggregates.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chronicle_db::{
    DbError, DocumentCollection, FindOptions, Filter, IndexSpec, VersionGuard, from_document,
    to_document,
};
use chronicle_types::{
    AggregateId, Event, EventId, INITIAL_SCHEMA_VERSION, Metadata, StorageStrategy, StoreError,
    StoreResult, timefmt, validate_batch,
};
use serde::{Deserialize, Serialize};

use crate::store::{EventStore, db_error, parse_aggregate_ids, version_i64};

/// Configuration for [`DocumentEventStore`].
#[derive(Debug, Clone)]
pub struct DocumentConfig {
    /// Stream type used when an event carries no aggregate type.
    pub stream_type: String,
    /// Whether to create the query indexes. The `(aggregateId, version)`
    /// unique index is always created.
    pub create_indexes: bool,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            stream_type: "aggregate".to_owned(),
            create_indexes: true,
        }
    }
}

const fn initial_schema_version() -> u32 {
    INITIAL_SCHEMA_VERSION
}

/// The persisted shape of one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventRow {
    id: String,
    stream_name: String,
    stream_type: String,
    aggregate_id: AggregateId,
    event_id: EventId,
    event_type: String,
    version: u64,
    #[serde(default = "initial_schema_version")]
    schema_version: u32,
    #[serde(with = "chronicle_types::timefmt::serde_ts")]
    timestamp: DateTime<Utc>,
    #[serde(with = "chronicle_types::encoding::base64_bytes")]
    data: Vec<u8>,
    #[serde(default)]
    metadata: Metadata,
    #[serde(with = "chronicle_types::timefmt::serde_ts")]
    created_at: DateTime<Utc>,
}

impl EventRow {
    fn new(event: &Event, stream_type: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            id: format!("{}:{}", event.aggregate_id, event.version),
            stream_name: format!("{stream_type}-{}", event.aggregate_id),
            stream_type: stream_type.to_owned(),
            aggregate_id: event.aggregate_id,
            event_id: event.id,
            event_type: event.event_type.clone(),
            version: event.version,
            schema_version: event.schema_version,
            timestamp: event.timestamp,
            data: event.data.clone(),
            metadata: event.metadata.clone(),
            created_at,
        }
    }

    fn into_event(self) -> Event {
        Event {
            id: self.event_id,
            aggregate_id: self.aggregate_id,
            aggregate_type: self.stream_type,
            event_type: self.event_type,
            version: self.version,
            schema_version: self.schema_version,
            data: self.data,
            timestamp: self.timestamp,
            metadata: self.metadata,
        }
    }
}

/// Filter for [`DocumentEventStore::query`].
///
/// Empty sets mean "any". Results are ordered by timestamp, then aggregate,
/// then version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventQuery {
    /// Restrict to these aggregates.
    pub aggregate_ids: Vec<AggregateId>,
    /// Restrict to these event types.
    pub event_types: Vec<String>,
    /// Only events at or after this instant.
    pub from: Option<DateTime<Utc>>,
    /// Only events strictly before this instant.
    pub to: Option<DateTime<Utc>>,
    /// Maximum number of events returned.
    pub limit: Option<usize>,
    /// Number of matching events skipped.
    pub offset: usize,
}

impl EventQuery {
    fn filter(&self) -> Filter {
        let mut filter = Filter::All;
        if !self.aggregate_ids.is_empty() {
            filter = filter.and(Filter::in_values(
                "aggregateId",
                self.aggregate_ids.iter().map(ToString::to_string),
            ));
        }
        if !self.event_types.is_empty() {
            filter = filter.and(Filter::in_values("eventType", self.event_types.iter().cloned()));
        }
        if let Some(from) = &self.from {
            filter = filter.and(Filter::gte("timestamp", timefmt::format(from)));
        }
        if let Some(to) = &self.to {
            filter = filter.and(Filter::lt("timestamp", timefmt::format(to)));
        }
        filter
    }
}

/// Event store keeping one document per event.
#[derive(Clone)]
pub struct DocumentEventStore {
    collection: Arc<dyn DocumentCollection>,
    config: DocumentConfig,
}

impl DocumentEventStore {
    /// Create a store over `collection`, ensuring its indexes.
    ///
    /// # Errors
    ///
    /// Returns backend errors from index creation.
    pub async fn new(
        collection: Arc<dyn DocumentCollection>,
        config: DocumentConfig,
    ) -> StoreResult<Self> {
        let mut indexes =
            vec![IndexSpec::new("aggregate_version", &["aggregateId", "version"]).unique()];
        if config.create_indexes {
            indexes.push(IndexSpec::new("event_type_timestamp", &["eventType", "timestamp"]));
            indexes.push(IndexSpec::new("stream_type_timestamp", &["streamType", "timestamp"]));
        }
        for index in &indexes {
            collection
                .ensure_index(index)
                .await
                .map_err(db_error("ensure_index"))?;
        }
        Ok(Self { collection, config })
    }

    /// Events matching `query`.
    ///
    /// # Errors
    ///
    /// Returns backend errors.
    pub async fn query(&self, query: &EventQuery) -> StoreResult<Vec<Event>> {
        let mut options = FindOptions::new()
            .sort_asc("timestamp")
            .sort_asc("aggregateId")
            .sort_asc("version")
            .skip(query.offset);
        if let Some(limit) = query.limit {
            options = options.limit(limit);
        }
        let docs = self
            .collection
            .find(&query.filter(), &options)
            .await
            .map_err(db_error("query"))?;
        rows_to_events(docs)
    }

    /// Number of stored events of one aggregate.
    ///
    /// # Errors
    ///
    /// Returns backend errors.
    pub async fn count(&self, aggregate_id: &AggregateId) -> StoreResult<u64> {
        self.collection
            .count(&Filter::eq("aggregateId", aggregate_id.to_string()))
            .await
            .map_err(db_error("count"))
    }
}

fn rows_to_events(docs: Vec<chronicle_db::Document>) -> StoreResult<Vec<Event>> {
    docs.into_iter()
        .map(|doc| from_document::<EventRow>(doc).map(EventRow::into_event))
        .collect::<Result<Vec<_>, _>>()
        .map_err(db_error("decode"))
}

#[async_trait]
impl EventStore for DocumentEventStore {
    async fn save(&self, events: &[Event], expected_version: u64) -> StoreResult<()> {
        let Some((aggregate_id, new_version)) = validate_batch(events, expected_version)? else {
            return Ok(());
        };
        let now = Utc::now();
        let rows = events
            .iter()
            .map(|event| {
                let stream_type = if event.aggregate_type.is_empty() {
                    &self.config.stream_type
                } else {
                    &event.aggregate_type
                };
                to_document(&EventRow::new(event, stream_type, now))
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error("save"))?;

        let guard = VersionGuard {
            filter: Filter::eq("aggregateId", aggregate_id.to_string()),
            field: "version".to_owned(),
            expected: version_i64(&aggregate_id, expected_version)?,
        };
        match self.collection.insert_many_guarded(&guard, rows).await {
            Ok(()) => {}
            Err(DbError::GuardFailed { actual, .. }) => {
                return Err(StoreError::conflict(
                    aggregate_id,
                    expected_version,
                    u64::try_from(actual).unwrap_or(0),
                ));
            }
            Err(DbError::DuplicateKey { .. }) => {
                let actual = self.current_version(&aggregate_id).await?;
                return Err(StoreError::conflict(aggregate_id, expected_version, actual));
            }
            Err(e) => return Err(db_error("save")(e)),
        }

        tracing::debug!(
            aggregate_id = %aggregate_id,
            count = events.len(),
            version = new_version,
            "Inserted event rows"
        );
        Ok(())
    }

    async fn load_from(
        &self,
        aggregate_id: &AggregateId,
        from_version: u64,
    ) -> StoreResult<Vec<Event>> {
        let filter = Filter::eq("aggregateId", aggregate_id.to_string())
            .and(Filter::gte("version", from_version));
        let docs = self
            .collection
            .find(&filter, &FindOptions::new().sort_asc("version"))
            .await
            .map_err(db_error("load"))?;
        rows_to_events(docs)
    }

    async fn current_version(&self, aggregate_id: &AggregateId) -> StoreResult<u64> {
        let max = self
            .collection
            .max_i64("version", &Filter::eq("aggregateId", aggregate_id.to_string()))
            .await
            .map_err(db_error("current_version"))?;
        Ok(max.and_then(|v| u64::try_from(v).ok()).unwrap_or(0))
    }

    async fn aggregate_ids(&self) -> StoreResult<Vec<AggregateId>> {
        let values = self
            .collection
            .distinct("aggregateId", &Filter::All)
            .await
            .map_err(db_error("aggregate_ids"))?;
        Ok(parse_aggregate_ids(values))
    }

    fn strategy(&self) -> StorageStrategy {
        StorageStrategy::Document
    }

    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}
