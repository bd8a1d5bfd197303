//! Document-backed [`StateStore`].
//!
//! Each snapshot is one document keyed `{aggregateType}:{aggregateId}:{version}`
//! and upserted on save. The payload runs through the [`PayloadCodec`]
//! before it is written, and the descriptors it returns are stored next to
//! the data so loads can reverse it. After a successful save a retention
//! sweep for the aggregate is queued on the [`RetentionSweeper`] when one is
//! running, or spawned as a detached task otherwise. Sweep failures are
//! logged and counted, never returned to the saver.
//!
//! [`RetentionSweeper`]: crate::sweeper::RetentionSweeper

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chronicle_db::{
    Document, DocumentCollection, FindOptions, Filter, ID_FIELD, IndexSpec, Update,
    from_document, to_document,
};
use chronicle_types::{
    AggregateId, AggregateState, CompressionInfo, EncryptionInfo, INITIAL_SCHEMA_VERSION,
    Metadata, StateSummary, StoreError, StoreResult, timefmt,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::codec::{EncodedPayload, PayloadCodec};
use crate::compression::CompressionConfig;
use crate::encryption::KeyProvider;
use crate::metrics::{OperationStats, StatsSnapshot, StorageMetrics};
use crate::retention::{RetentionConfig, RetentionPolicy};
use crate::store::{StateMetricsStore, StateQuery, StateQueryStore, StateStore, db_error};

/// Summary fields read by listings, retention, and metrics.
const SUMMARY_FIELDS: &[&str] = &[
    "aggregateId",
    "aggregateType",
    "version",
    "stateTimestamp",
    "systemMetadata",
    "compression.type",
    "encryption.type",
];

/// Configuration for [`DocumentStateStore`].
#[derive(Clone)]
pub struct StateStoreConfig {
    /// Compression settings; `None` disables compression.
    pub compression: Option<CompressionConfig>,
    /// Encryption key source; `None` disables encryption.
    pub key_provider: Option<Arc<dyn KeyProvider>>,
    /// Retention rule applied after saves.
    pub retention: RetentionConfig,
    /// Page size used when scanning summaries.
    pub batch_size: usize,
    /// Whether to create the secondary indexes. The `(aggregateId, version)`
    /// unique index is always created.
    pub create_indexes: bool,
    /// Whether to maintain [`OperationStats`].
    pub collect_metrics: bool,
    /// Rows expire this long after they are saved.
    pub ttl: Option<Duration>,
    /// Stamp `lastAccessedAt` on every load.
    pub track_access: bool,
    /// Queue a retention sweep after every save.
    pub sweep_on_save: bool,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            compression: None,
            key_provider: None,
            retention: RetentionConfig::None,
            batch_size: 100,
            create_indexes: true,
            collect_metrics: true,
            ttl: None,
            track_access: false,
            sweep_on_save: true,
        }
    }
}

impl fmt::Debug for StateStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStoreConfig")
            .field("compression", &self.compression)
            .field("encryption_key_id", &self.key_provider.as_ref().map(|p| p.key_id()))
            .field("retention", &self.retention)
            .field("batch_size", &self.batch_size)
            .field("create_indexes", &self.create_indexes)
            .field("collect_metrics", &self.collect_metrics)
            .field("ttl", &self.ttl)
            .field("track_access", &self.track_access)
            .field("sweep_on_save", &self.sweep_on_save)
            .finish()
    }
}

impl StateStoreConfig {
    /// Reject invalid settings before any I/O.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] naming the offending field.
    pub fn validate(&self) -> StoreResult<()> {
        if self.batch_size == 0 {
            return Err(StoreError::validation("state.batch_size", "must be positive"));
        }
        if let Some(compression) = &self.compression {
            compression.validate()?;
        }
        if let Some(ttl) = self.ttl {
            if ttl.is_zero() || chrono::Duration::from_std(ttl).is_err() {
                return Err(StoreError::validation("state.ttl", "must be positive and finite"));
            }
        }
        self.retention.validate()
    }
}

const fn initial_schema_version() -> u32 {
    INITIAL_SCHEMA_VERSION
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SystemMetadata {
    original_size: u64,
    stored_size: u64,
    #[serde(default)]
    compressed: bool,
    #[serde(default)]
    encrypted: bool,
}

/// The persisted shape of one snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateDocument {
    id: String,
    aggregate_id: AggregateId,
    aggregate_type: String,
    version: u64,
    #[serde(default = "initial_schema_version")]
    document_version: u32,
    #[serde(with = "chronicle_types::encoding::base64_bytes")]
    data: Vec<u8>,
    data_format: String,
    data_encoding: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    compression: Option<CompressionInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    encryption: Option<EncryptionInfo>,
    #[serde(with = "chronicle_types::timefmt::serde_ts")]
    state_timestamp: DateTime<Utc>,
    #[serde(with = "chronicle_types::timefmt::serde_ts")]
    created_at: DateTime<Utc>,
    #[serde(with = "chronicle_types::timefmt::serde_ts")]
    updated_at: DateTime<Utc>,
    #[serde(
        default,
        with = "chronicle_types::timefmt::serde_ts_opt",
        skip_serializing_if = "Option::is_none"
    )]
    last_accessed_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chronicle_types::timefmt::serde_ts_opt",
        skip_serializing_if = "Option::is_none"
    )]
    ttl: Option<DateTime<Utc>>,
    #[serde(default)]
    system_metadata: SystemMetadata,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    processing_time_ms: u64,
    #[serde(default)]
    retry_count: u32,
    #[serde(default)]
    error_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
}

/// Document id of a snapshot row.
pub fn state_document_id(aggregate_type: &str, aggregate_id: &AggregateId, version: u64) -> String {
    format!("{aggregate_type}:{aggregate_id}:{version}")
}

fn len_u64(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}

impl StateDocument {
    fn new(
        state: &AggregateState,
        encoded: EncodedPayload,
        now: DateTime<Utc>,
        ttl: Option<DateTime<Utc>>,
        processing_time_ms: u64,
    ) -> Self {
        let tags = state
            .metadata
            .get("tags")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            id: state_document_id(&state.aggregate_type, &state.aggregate_id, state.version),
            aggregate_id: state.aggregate_id,
            aggregate_type: state.aggregate_type.clone(),
            version: state.version,
            document_version: state.schema_version,
            system_metadata: SystemMetadata {
                original_size: len_u64(state.data.len()),
                stored_size: len_u64(encoded.data.len()),
                compressed: encoded.compression.is_some(),
                encrypted: encoded.encryption.is_some(),
            },
            data: encoded.data,
            data_format: "binary".to_owned(),
            data_encoding: "base64".to_owned(),
            compression: encoded.compression,
            encryption: encoded.encryption,
            state_timestamp: state.timestamp,
            created_at: now,
            updated_at: now,
            last_accessed_at: None,
            ttl,
            metadata: state.metadata.clone(),
            tags,
            processing_time_ms,
            retry_count: 0,
            error_count: 0,
            last_error: None,
        }
    }

    fn into_state(self, codec: &PayloadCodec) -> StoreResult<AggregateState> {
        let data = codec.decode(&self.data, self.compression.as_ref(), self.encryption.as_ref())?;
        Ok(AggregateState {
            aggregate_id: self.aggregate_id,
            aggregate_type: self.aggregate_type,
            version: self.version,
            schema_version: self.document_version,
            data,
            metadata: self.metadata,
            timestamp: self.state_timestamp,
        })
    }
}

#[derive(Debug, Deserialize)]
struct KindOnly {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryRow {
    aggregate_id: AggregateId,
    aggregate_type: String,
    version: u64,
    #[serde(with = "chronicle_types::timefmt::serde_ts")]
    state_timestamp: DateTime<Utc>,
    #[serde(default)]
    system_metadata: SystemMetadata,
    #[serde(default)]
    compression: Option<KindOnly>,
    #[serde(default)]
    encryption: Option<KindOnly>,
}

impl From<SummaryRow> for StateSummary {
    fn from(row: SummaryRow) -> Self {
        Self {
            aggregate_id: row.aggregate_id,
            aggregate_type: row.aggregate_type,
            version: row.version,
            timestamp: row.state_timestamp,
            original_size: row.system_metadata.original_size,
            stored_size: row.system_metadata.stored_size,
            compression: row.compression.map(|c| c.kind),
            encryption: row.encryption.map(|e| e.kind),
        }
    }
}

fn aggregate_filter(aggregate_id: &AggregateId) -> Filter {
    Filter::eq("aggregateId", aggregate_id.to_string())
}

fn version_filter(aggregate_id: &AggregateId, version: u64) -> Filter {
    aggregate_filter(aggregate_id).and(Filter::eq("version", version))
}

struct StateInner {
    collection: Arc<dyn DocumentCollection>,
    config: StateStoreConfig,
    codec: PayloadCodec,
    retention: Option<Arc<dyn RetentionPolicy>>,
    stats: OperationStats,
    sweeper: Mutex<Option<mpsc::Sender<(AggregateId, u64)>>>,
}

/// State store over a [`DocumentCollection`].
#[derive(Clone)]
pub struct DocumentStateStore {
    inner: Arc<StateInner>,
}

impl fmt::Debug for DocumentStateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentStateStore")
            .field("collection", &self.inner.collection.name())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl DocumentStateStore {
    /// Validate `config`, build the codec and retention policy, and ensure
    /// the collection's indexes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for bad settings and backend
    /// errors from index creation.
    pub async fn new(
        collection: Arc<dyn DocumentCollection>,
        config: StateStoreConfig,
    ) -> StoreResult<Self> {
        config.validate()?;
        let codec = PayloadCodec::new(config.compression.clone(), config.key_provider.clone())?;
        let retention = config.retention.build()?;

        let mut indexes =
            vec![IndexSpec::new("aggregate_version", &["aggregateId", "version"]).unique()];
        if config.create_indexes {
            indexes.push(IndexSpec::new("type_timestamp", &["aggregateType", "stateTimestamp"]));
            indexes.push(IndexSpec::new("ttl", &["ttl"]).ttl());
        }
        for index in &indexes {
            collection
                .ensure_index(index)
                .await
                .map_err(db_error("ensure_index"))?;
        }

        let policy = retention
            .as_ref()
            .map_or_else(|| "none".to_owned(), |p| p.name());
        tracing::debug!(
            collection = collection.name(),
            compression = codec.compresses(),
            encryption = codec.encrypts(),
            retention = %policy,
            "State store ready"
        );
        Ok(Self {
            inner: Arc::new(StateInner {
                collection,
                config,
                codec,
                retention,
                stats: OperationStats::default(),
                sweeper: Mutex::new(None),
            }),
        })
    }

    /// The active configuration.
    pub fn config(&self) -> &StateStoreConfig {
        &self.inner.config
    }

    /// Counter snapshot, or `None` when metrics collection is off.
    pub fn stats(&self) -> Option<StatsSnapshot> {
        self.inner
            .config
            .collect_metrics
            .then(|| self.inner.stats.snapshot())
    }

    fn with_stats(&self, record: impl FnOnce(&OperationStats)) {
        if self.inner.config.collect_metrics {
            record(&self.inner.stats);
        }
    }

    fn tracked<T>(&self, result: StoreResult<T>) -> StoreResult<T> {
        if result.is_err() {
            self.with_stats(OperationStats::record_error);
        }
        result
    }

    /// Delete rows whose `ttl` has passed, returning how many went.
    ///
    /// # Errors
    ///
    /// Returns backend errors.
    pub async fn purge_expired(&self) -> StoreResult<u64> {
        let removed = self
            .inner
            .collection
            .purge_expired("ttl", Utc::now())
            .await
            .map_err(db_error("purge_expired"))?;
        if removed > 0 {
            tracing::info!(
                collection = self.inner.collection.name(),
                removed,
                "Purged expired states"
            );
        }
        Ok(removed)
    }

    /// Run the retention policy for one aggregate now.
    ///
    /// The newest stored version is never deleted. Returns the number of
    /// rows removed.
    ///
    /// # Errors
    ///
    /// Returns backend errors.
    pub async fn apply_retention(&self, aggregate_id: &AggregateId) -> StoreResult<u64> {
        self.retain(aggregate_id, None).await
    }

    /// Retention pass that also spares `keep`, the version a save just wrote.
    async fn retain(&self, aggregate_id: &AggregateId, keep: Option<u64>) -> StoreResult<u64> {
        let Some(policy) = &self.inner.retention else {
            return Ok(0);
        };
        let states = self.list(aggregate_id).await?;
        let Some(newest) = states.iter().map(|s| s.version).max() else {
            return Ok(0);
        };
        let doomed: Vec<u64> = policy
            .cleanup_candidates(&states, Utc::now())
            .into_iter()
            .map(|s| s.version)
            .filter(|v| *v != newest && Some(*v) != keep)
            .collect();

        let removed = if doomed.is_empty() {
            0
        } else {
            let filter = aggregate_filter(aggregate_id).and(Filter::in_values("version", doomed));
            self.inner
                .collection
                .delete_many(&filter)
                .await
                .map_err(db_error("retention"))?
        };
        self.with_stats(|s| s.record_sweep(removed));
        if removed > 0 {
            tracing::debug!(
                aggregate_id = %aggregate_id,
                policy = %policy.name(),
                removed,
                "Applied retention"
            );
        }
        Ok(removed)
    }

    /// Apply retention after a save of `saved` and log instead of returning
    /// failures. The saved version survives even when it is not the newest.
    pub(crate) async fn sweep_logged(&self, aggregate_id: &AggregateId, saved: u64) {
        if let Err(e) = self.retain(aggregate_id, Some(saved)).await {
            self.with_stats(OperationStats::record_sweep_failure);
            tracing::warn!(aggregate_id = %aggregate_id, error = %e, "Retention sweep failed");
        }
    }

    pub(crate) fn attach_sweeper(&self, queue: mpsc::Sender<(AggregateId, u64)>) {
        *self.inner.sweeper.lock() = Some(queue);
    }

    pub(crate) fn detach_sweeper(&self) {
        self.inner.sweeper.lock().take();
    }

    fn schedule_retention(&self, aggregate_id: AggregateId, version: u64) {
        if self.inner.retention.is_none() || !self.inner.config.sweep_on_save {
            return;
        }
        let queued = self
            .inner
            .sweeper
            .lock()
            .as_ref()
            .map(|queue| queue.try_send((aggregate_id, version)));
        match queued {
            Some(Ok(())) => {}
            Some(Err(mpsc::error::TrySendError::Full(_))) => {
                tracing::debug!(aggregate_id = %aggregate_id, version, "Retention queue full, sweep skipped");
            }
            Some(Err(mpsc::error::TrySendError::Closed(_))) | None => {
                let store = self.clone();
                tokio::spawn(async move { store.sweep_logged(&aggregate_id, version).await });
            }
        }
    }

    async fn summaries(&self, filter: &Filter) -> StoreResult<Vec<StateSummary>> {
        let batch = self.inner.config.batch_size;
        let mut out = Vec::new();
        loop {
            let options = FindOptions::new()
                .sort_desc("version")
                .sort_asc("aggregateId")
                .skip(out.len())
                .limit(batch)
                .project(SUMMARY_FIELDS);
            let docs = self
                .inner
                .collection
                .find(filter, &options)
                .await
                .map_err(db_error("list"))?;
            let fetched = docs.len();
            for doc in docs {
                let row: SummaryRow = from_document(doc).map_err(db_error("list"))?;
                out.push(StateSummary::from(row));
            }
            if fetched < batch {
                return Ok(out);
            }
        }
    }

    fn decode(&self, doc: Document) -> StoreResult<AggregateState> {
        let row: StateDocument = from_document(doc).map_err(db_error("decode"))?;
        row.into_state(&self.inner.codec)
    }

    async fn touch(&self, aggregate_id: &AggregateId, version: u64) {
        let update = Update::new().set("lastAccessedAt", timefmt::format(&Utc::now()));
        if let Err(e) = self
            .inner
            .collection
            .update_one(&version_filter(aggregate_id, version), &update)
            .await
        {
            tracing::warn!(aggregate_id = %aggregate_id, version, error = %e, "Access tracking failed");
        }
    }

    async fn fetch(&self, filter: &Filter, operation: &'static str) -> StoreResult<Option<Document>> {
        self.inner
            .collection
            .find_one(filter, &FindOptions::new().sort_desc("version"))
            .await
            .map_err(db_error(operation))
    }

    async fn finish_load(&self, doc: Document) -> StoreResult<AggregateState> {
        let state = self.decode(doc)?;
        if self.inner.config.track_access {
            self.touch(&state.aggregate_id, state.version).await;
        }
        self.with_stats(|s| s.record_load(state.data.len()));
        Ok(state)
    }

    async fn save_inner(&self, state: &AggregateState) -> StoreResult<()> {
        state.validate()?;
        let started = Instant::now();
        let encoded = self.inner.codec.encode(&state.data)?;
        let processing_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let now = Utc::now();
        let ttl = self
            .inner
            .config
            .ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| now.checked_add_signed(ttl));
        let row = StateDocument::new(state, encoded, now, ttl, processing_time_ms);
        let stored = row.data.len();
        let filter = Filter::eq(ID_FIELD, row.id.clone());
        let doc = to_document(&row).map_err(db_error("save_state"))?;
        self.inner
            .collection
            .replace_one(&filter, doc, true)
            .await
            .map_err(db_error("save_state"))?;

        self.with_stats(|s| s.record_save(state.data.len(), stored));
        tracing::debug!(
            aggregate_id = %state.aggregate_id,
            version = state.version,
            original = state.data.len(),
            stored,
            "Saved state"
        );
        self.schedule_retention(state.aggregate_id, state.version);
        Ok(())
    }
}

#[async_trait]
impl StateStore for DocumentStateStore {
    async fn save(&self, state: &AggregateState) -> StoreResult<()> {
        let result = self.save_inner(state).await;
        self.tracked(result)
    }

    async fn load(&self, aggregate_id: &AggregateId) -> StoreResult<AggregateState> {
        let result = match self.fetch(&aggregate_filter(aggregate_id), "load_state").await {
            Ok(Some(doc)) => self.finish_load(doc).await,
            Ok(None) => Err(StoreError::not_found("state", aggregate_id)),
            Err(e) => Err(e),
        };
        self.tracked(result)
    }

    async fn load_version(
        &self,
        aggregate_id: &AggregateId,
        version: u64,
    ) -> StoreResult<AggregateState> {
        let filter = version_filter(aggregate_id, version);
        let result = match self.fetch(&filter, "load_state_version").await {
            Ok(Some(doc)) => self.finish_load(doc).await,
            Ok(None) => Err(StoreError::not_found("state", format!("{aggregate_id}@{version}"))),
            Err(e) => Err(e),
        };
        self.tracked(result)
    }

    async fn delete(&self, aggregate_id: &AggregateId, version: u64) -> StoreResult<()> {
        let removed = self
            .inner
            .collection
            .delete_many(&version_filter(aggregate_id, version))
            .await
            .map_err(db_error("delete_state"))?;
        if removed == 0 {
            return Err(StoreError::not_found("state", format!("{aggregate_id}@{version}")));
        }
        self.with_stats(|s| s.record_delete(removed));
        tracing::debug!(aggregate_id = %aggregate_id, version, "Deleted state");
        Ok(())
    }

    async fn delete_all(&self, aggregate_id: &AggregateId) -> StoreResult<u64> {
        let removed = self
            .inner
            .collection
            .delete_many(&aggregate_filter(aggregate_id))
            .await
            .map_err(db_error("delete_all_states"))?;
        self.with_stats(|s| s.record_delete(removed));
        tracing::debug!(aggregate_id = %aggregate_id, removed, "Deleted all states");
        Ok(removed)
    }

    async fn list(&self, aggregate_id: &AggregateId) -> StoreResult<Vec<StateSummary>> {
        self.summaries(&aggregate_filter(aggregate_id)).await
    }

    async fn count(&self, aggregate_id: &AggregateId) -> StoreResult<u64> {
        self.inner
            .collection
            .count(&aggregate_filter(aggregate_id))
            .await
            .map_err(db_error("count_states"))
    }

    async fn exists(&self, aggregate_id: &AggregateId, version: u64) -> StoreResult<bool> {
        let n = self
            .inner
            .collection
            .count(&version_filter(aggregate_id, version))
            .await
            .map_err(db_error("state_exists"))?;
        Ok(n > 0)
    }

    async fn close(&self) -> StoreResult<()> {
        self.detach_sweeper();
        Ok(())
    }
}

impl StateQuery {
    fn filter(&self) -> Filter {
        let mut filter = Filter::All;
        if !self.aggregate_types.is_empty() {
            filter = filter.and(Filter::in_values(
                "aggregateType",
                self.aggregate_types.iter().cloned(),
            ));
        }
        if !self.aggregate_ids.is_empty() {
            filter = filter.and(Filter::in_values(
                "aggregateId",
                self.aggregate_ids.iter().map(ToString::to_string),
            ));
        }
        if let Some(min) = self.min_version {
            filter = filter.and(Filter::gte("version", min));
        }
        if let Some(max) = self.max_version {
            filter = filter.and(Filter::lte("version", max));
        }
        if let Some(from) = &self.from {
            filter = filter.and(Filter::gte("stateTimestamp", timefmt::format(from)));
        }
        if let Some(to) = &self.to {
            filter = filter.and(Filter::lt("stateTimestamp", timefmt::format(to)));
        }
        filter
    }
}

#[async_trait]
impl StateQueryStore for DocumentStateStore {
    async fn query(&self, query: &StateQuery) -> StoreResult<Vec<AggregateState>> {
        let mut options = FindOptions::new()
            .sort_asc("aggregateType")
            .sort_asc("aggregateId")
            .sort_asc("version")
            .skip(query.offset);
        if let Some(limit) = query.limit {
            options = options.limit(limit);
        }
        let docs = self
            .inner
            .collection
            .find(&query.filter(), &options)
            .await
            .map_err(db_error("query_states"))?;
        docs.into_iter().map(|doc| self.decode(doc)).collect()
    }

    async fn aggregate_types(&self) -> StoreResult<Vec<String>> {
        let values = self
            .inner
            .collection
            .distinct("aggregateType", &Filter::All)
            .await
            .map_err(db_error("aggregate_types"))?;
        let mut types: Vec<String> = values
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_owned))
            .collect();
        types.sort();
        types.dedup();
        Ok(types)
    }

    async fn versions(&self, aggregate_id: &AggregateId) -> StoreResult<Vec<u64>> {
        let options = FindOptions::new().sort_asc("version").project(&["version"]);
        let docs = self
            .inner
            .collection
            .find(&aggregate_filter(aggregate_id), &options)
            .await
            .map_err(db_error("versions"))?;
        Ok(docs
            .iter()
            .filter_map(|doc| doc.get("version").and_then(serde_json::Value::as_u64))
            .collect())
    }
}

#[async_trait]
impl StateMetricsStore for DocumentStateStore {
    async fn storage_metrics(&self, scope: Option<&AggregateId>) -> StoreResult<StorageMetrics> {
        let filter = scope.map_or(Filter::All, aggregate_filter);
        let summaries = self.summaries(&filter).await?;
        Ok(StorageMetrics::from_summaries(&summaries))
    }
}
