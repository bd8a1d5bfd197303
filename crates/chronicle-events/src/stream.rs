//! Stream strategy: all events of an aggregate in one growing document.
//!
//! The head document (id = aggregate id) holds the `events` array and a
//! `version` counter. Appends are a single conditional update matched on
//! `version`, so the match itself is the compare-and-swap.
//!
//! Backends cap document size, so once the head holds more than
//! `split_threshold` events a background task moves the older ones into a
//! continuation document `{aggregateId}:seg:{n}`:
//!
//! 1. insert the segment (an orphan from an interrupted split is adopted)
//! 2. trim the head under a CAS on `(version, segments)`
//! 3. on CAS failure, delete the segment unless the head now references it
//!
//! A crash between 1 and 2 leaves events in both documents; loads
//! de-duplicate by version, so nothing is lost or repeated.
//!
//! The head's `segments` field is a counter of segment numbers ever used,
//! not the number of segments currently stored. `oldestEventAt` tracks the
//! oldest event of the whole stream so the hybrid archiver can find aged
//! streams with a plain range filter.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chronicle_db::{
    DbError, DocumentCollection, FindOptions, Filter, ID_FIELD, IndexSpec, Update,
    from_document, to_document,
};
use chronicle_types::{
    AggregateId, Event, EventId, INITIAL_SCHEMA_VERSION, Metadata, StorageStrategy, StoreError,
    StoreResult, timefmt, validate_batch,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::{EventStore, db_error, parse_aggregate_ids, sort_dedup};

/// Default number of head events that triggers a split.
pub const DEFAULT_SPLIT_THRESHOLD: usize = 1000;

/// Default number of newest events left in the head after a split.
pub const DEFAULT_RETAIN_AFTER_SPLIT: usize = 100;

/// How many times a split retries after losing a CAS race with an append.
const SPLIT_ATTEMPTS: usize = 3;

/// How many times a trim retries after losing a CAS race with an append.
const TRIM_ATTEMPTS: usize = 5;

/// Configuration for [`StreamEventStore`].
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Stream type used when an event carries no aggregate type.
    pub stream_type: String,
    /// Head size above which the stream is split.
    pub split_threshold: usize,
    /// Newest events kept in the head by a split.
    pub retain_after_split: usize,
    /// Whether to create secondary indexes on construction.
    pub create_indexes: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            stream_type: "aggregate".to_owned(),
            split_threshold: DEFAULT_SPLIT_THRESHOLD,
            retain_after_split: DEFAULT_RETAIN_AFTER_SPLIT,
            create_indexes: true,
        }
    }
}

impl StreamConfig {
    /// Set the fallback stream type.
    #[must_use]
    pub fn with_stream_type(mut self, stream_type: impl Into<String>) -> Self {
        self.stream_type = stream_type.into();
        self
    }

    /// Set the split threshold and the number of events kept by a split.
    #[must_use]
    pub const fn with_split(mut self, threshold: usize, retain: usize) -> Self {
        self.split_threshold = threshold;
        self.retain_after_split = retain;
        self
    }

    fn validate(&self) -> StoreResult<()> {
        if self.split_threshold == 0 {
            return Err(StoreError::validation("split_threshold", "must be positive"));
        }
        if self.retain_after_split >= self.split_threshold {
            return Err(StoreError::validation(
                "retain_after_split",
                "must be smaller than split_threshold",
            ));
        }
        Ok(())
    }
}

// =========================================================================
// Document shapes
// =========================================================================

const fn initial_schema_version() -> u32 {
    INITIAL_SCHEMA_VERSION
}

/// One element of a stream's `events` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamEntry {
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
}

impl StreamEntry {
    fn from_event(event: &Event) -> Self {
        Self {
            event_id: event.id,
            event_type: event.event_type.clone(),
            version: event.version,
            schema_version: event.schema_version,
            timestamp: event.timestamp,
            data: event.data.clone(),
            metadata: event.metadata.clone(),
        }
    }

    fn into_event(self, aggregate_id: AggregateId, aggregate_type: &str) -> Event {
        Event {
            id: self.event_id,
            aggregate_id,
            aggregate_type: aggregate_type.to_owned(),
            event_type: self.event_type,
            version: self.version,
            schema_version: self.schema_version,
            data: self.data,
            timestamp: self.timestamp,
            metadata: self.metadata,
        }
    }
}

/// The head document of a stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamDocument {
    id: String,
    stream_name: String,
    stream_type: String,
    aggregate_id: AggregateId,
    version: u64,
    event_count: u64,
    #[serde(default)]
    segments: u64,
    #[serde(default, with = "chronicle_types::timefmt::serde_ts_opt")]
    oldest_event_at: Option<DateTime<Utc>>,
    events: Vec<StreamEntry>,
    #[serde(with = "chronicle_types::timefmt::serde_ts")]
    created_at: DateTime<Utc>,
    #[serde(with = "chronicle_types::timefmt::serde_ts")]
    updated_at: DateTime<Utc>,
}

/// A continuation document holding events moved out of the head.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SegmentDocument {
    id: String,
    aggregate_id: AggregateId,
    stream_type: String,
    segment: u64,
    from_version: u64,
    to_version: u64,
    events: Vec<StreamEntry>,
    #[serde(with = "chronicle_types::timefmt::serde_ts")]
    created_at: DateTime<Utc>,
}

fn segment_id(aggregate_id: &AggregateId, segment: u64) -> String {
    format!("{aggregate_id}:seg:{segment}")
}

fn head_filter(aggregate_id: &AggregateId) -> Filter {
    Filter::eq(ID_FIELD, aggregate_id.to_string())
}

fn segments_filter(aggregate_id: &AggregateId) -> Filter {
    Filter::eq("aggregateId", aggregate_id.to_string()).and(Filter::exists("segment", true))
}

fn entries_value(entries: &[StreamEntry]) -> StoreResult<Value> {
    Ok(serde_json::to_value(entries)?)
}

fn earliest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn timestamp_value(ts: Option<DateTime<Utc>>) -> Value {
    ts.map_or(Value::Null, |ts| Value::String(timefmt::format(&ts)))
}

// =========================================================================
// Store
// =========================================================================

struct StreamInner {
    collection: Arc<dyn DocumentCollection>,
    config: StreamConfig,
    /// Estimated head size per stream, seeded on first append.
    pending: Mutex<HashMap<AggregateId, usize>>,
    /// Streams with a split or trim in flight in this process.
    busy: Mutex<HashSet<AggregateId>>,
}

/// Marks a stream busy until dropped.
struct StreamClaim {
    inner: Arc<StreamInner>,
    aggregate_id: AggregateId,
}

impl StreamClaim {
    fn try_new(inner: &Arc<StreamInner>, aggregate_id: AggregateId) -> Option<Self> {
        inner.busy.lock().insert(aggregate_id).then(|| Self {
            inner: Arc::clone(inner),
            aggregate_id,
        })
    }
}

impl Drop for StreamClaim {
    fn drop(&mut self) {
        self.inner.busy.lock().remove(&self.aggregate_id);
    }
}

/// Event store keeping each aggregate's history in one document.
///
/// Cheap to clone; clones share the collection and split bookkeeping.
#[derive(Clone)]
pub struct StreamEventStore {
    inner: Arc<StreamInner>,
}

impl StreamEventStore {
    /// Create a store over `collection`, ensuring its indexes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for an inconsistent split
    /// configuration and backend errors from index creation.
    pub async fn new(
        collection: Arc<dyn DocumentCollection>,
        config: StreamConfig,
    ) -> StoreResult<Self> {
        config.validate()?;
        if config.create_indexes {
            for index in [
                IndexSpec::new("aggregate_segment", &["aggregateId", "segment"]),
                IndexSpec::new("oldest_event", &["oldestEventAt"]),
                IndexSpec::new("stream_type_updated", &["streamType", "updatedAt"]),
            ] {
                collection
                    .ensure_index(&index)
                    .await
                    .map_err(db_error("ensure_index"))?;
            }
        }
        Ok(Self {
            inner: Arc::new(StreamInner {
                collection,
                config,
                pending: Mutex::new(HashMap::new()),
                busy: Mutex::new(HashSet::new()),
            }),
        })
    }

    /// The configuration this store was built with.
    pub fn config(&self) -> &StreamConfig {
        &self.inner.config
    }

    /// Split the stream now if its head is over the threshold.
    ///
    /// Returns the new segment number, or `None` when no split was needed
    /// or another split of this stream is already running.
    ///
    /// # Errors
    ///
    /// Returns backend errors; a lost CAS race is retried, not surfaced.
    pub async fn split(&self, aggregate_id: &AggregateId) -> StoreResult<Option<u64>> {
        let Some(_claim) = StreamClaim::try_new(&self.inner, *aggregate_id) else {
            return Ok(None);
        };
        split_stream(&self.inner, *aggregate_id).await
    }

    /// Streams whose oldest event is older than `cutoff`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns backend errors.
    pub async fn archive_candidates(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<AggregateId>> {
        let filter = Filter::exists("streamName", true)
            .and(Filter::lt("oldestEventAt", timefmt::format(&cutoff)));
        let options = FindOptions::new()
            .sort_asc("oldestEventAt")
            .limit(limit)
            .project(&["aggregateId"]);
        let docs = self
            .inner
            .collection
            .find(&filter, &options)
            .await
            .map_err(db_error("archive_candidates"))?;
        Ok(parse_aggregate_ids(
            docs.into_iter()
                .filter_map(|mut doc| doc.remove("aggregateId"))
                .collect(),
        ))
    }

    /// The oldest contiguous run of events older than `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns backend errors.
    pub async fn aged_events(
        &self,
        aggregate_id: &AggregateId,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<Event>> {
        let events = load_events(&self.inner, aggregate_id, 1)
            .await?
            .unwrap_or_default();
        Ok(events
            .into_iter()
            .take_while(|e| e.timestamp < cutoff)
            .collect())
    }

    /// Remove every event with `version <= through` from the head and its
    /// segments, returning how many were removed.
    ///
    /// The head document and its `version` counter stay, so appends keep
    /// their compare-and-swap base. Returns 0 without touching anything
    /// when a split of this stream is in flight.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConcurrencyConflict`] if appends keep winning
    /// the trim race, and backend errors.
    pub async fn remove_through(&self, aggregate_id: &AggregateId, through: u64) -> StoreResult<usize> {
        let Some(_claim) = StreamClaim::try_new(&self.inner, *aggregate_id) else {
            tracing::debug!(aggregate_id = %aggregate_id, "Stream busy, skipping trim");
            return Ok(0);
        };
        let collection = &self.inner.collection;
        let mut removed = 0usize;
        let mut oldest_remaining: Option<DateTime<Utc>> = None;

        for mut segment in read_segments(&self.inner, aggregate_id, 1).await? {
            let before = segment.events.len();
            segment.events.retain(|e| e.version > through);
            removed = removed.saturating_add(before.saturating_sub(segment.events.len()));

            if segment.events.is_empty() {
                collection
                    .delete_many(&Filter::eq(ID_FIELD, segment.id.clone()))
                    .await
                    .map_err(db_error("remove_through"))?;
                continue;
            }
            if segment.events.len() != before {
                if let Some(first) = segment.events.first() {
                    segment.from_version = first.version;
                }
                collection
                    .replace_one(
                        &Filter::eq(ID_FIELD, segment.id.clone()),
                        to_document(&segment).map_err(db_error("remove_through"))?,
                        false,
                    )
                    .await
                    .map_err(db_error("remove_through"))?;
            }
            oldest_remaining = earliest(
                oldest_remaining,
                segment.events.iter().map(|e| e.timestamp).min(),
            );
        }

        let mut last_seen = 0;
        for _ in 0..TRIM_ATTEMPTS {
            let Some(head) = read_head(&self.inner, aggregate_id).await? else {
                return Ok(removed);
            };
            last_seen = head.version;
            let before = head.events.len();
            let kept: Vec<StreamEntry> = head
                .events
                .into_iter()
                .filter(|e| e.version > through)
                .collect();
            if kept.len() == before {
                return Ok(removed);
            }
            let oldest = earliest(oldest_remaining, kept.iter().map(|e| e.timestamp).min());

            let filter = head_filter(aggregate_id).and(Filter::eq("version", head.version));
            let update = Update::new()
                .set("events", entries_value(&kept)?)
                .set("oldestEventAt", timestamp_value(oldest))
                .set("updatedAt", timefmt::format(&Utc::now()));
            let matched = collection
                .update_one(&filter, &update)
                .await
                .map_err(db_error("remove_through"))?;
            if matched == 1 {
                removed = removed.saturating_add(before.saturating_sub(kept.len()));
                self.inner.pending.lock().insert(*aggregate_id, kept.len());
                tracing::debug!(
                    aggregate_id = %aggregate_id,
                    through,
                    removed,
                    "Trimmed stream head"
                );
                return Ok(removed);
            }
        }

        let actual = self.current_version(aggregate_id).await?;
        Err(StoreError::conflict(aggregate_id, last_seen, actual))
    }

    /// Create an empty head at `version` for a stream whose history lives
    /// elsewhere. An existing head is left untouched.
    pub(crate) async fn seed_head(
        &self,
        aggregate_id: &AggregateId,
        stream_type: &str,
        version: u64,
    ) -> StoreResult<()> {
        let now = Utc::now();
        let head = StreamDocument {
            id: aggregate_id.to_string(),
            stream_name: format!("{stream_type}-{aggregate_id}"),
            stream_type: stream_type.to_owned(),
            aggregate_id: *aggregate_id,
            version,
            event_count: 0,
            segments: 0,
            oldest_event_at: None,
            events: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        match self
            .inner
            .collection
            .insert_one(to_document(&head).map_err(db_error("seed_head"))?)
            .await
        {
            Ok(()) | Err(DbError::DuplicateKey { .. }) => Ok(()),
            Err(e) => Err(db_error("seed_head")(e)),
        }
    }

    fn stream_type_for<'a>(&'a self, event: &'a Event) -> &'a str {
        if event.aggregate_type.is_empty() {
            &self.inner.config.stream_type
        } else {
            &event.aggregate_type
        }
    }

    /// Record an append and start a background split when the head is due.
    fn track_append(&self, aggregate_id: AggregateId, expected: u64, appended: usize) {
        let due = {
            let mut pending = self.inner.pending.lock();
            let count = pending
                .entry(aggregate_id)
                .or_insert_with(|| usize::try_from(expected).unwrap_or(usize::MAX));
            *count = count.saturating_add(appended);
            *count > self.inner.config.split_threshold
        };
        if !due {
            return;
        }
        let Some(claim) = StreamClaim::try_new(&self.inner, aggregate_id) else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let _claim = claim;
            match split_stream(&inner, aggregate_id).await {
                Ok(Some(segment)) => {
                    tracing::debug!(aggregate_id = %aggregate_id, segment, "Split stream");
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(aggregate_id = %aggregate_id, error = %e, "Stream split failed");
                }
            }
        });
    }
}

async fn read_head(
    inner: &StreamInner,
    aggregate_id: &AggregateId,
) -> StoreResult<Option<StreamDocument>> {
    let doc = inner
        .collection
        .find_one(&head_filter(aggregate_id), &FindOptions::new())
        .await
        .map_err(db_error("read_head"))?;
    doc.map(from_document)
        .transpose()
        .map_err(db_error("read_head"))
}

async fn read_segments(
    inner: &StreamInner,
    aggregate_id: &AggregateId,
    from_version: u64,
) -> StoreResult<Vec<SegmentDocument>> {
    let filter = segments_filter(aggregate_id).and(Filter::gte("toVersion", from_version));
    let docs = inner
        .collection
        .find(&filter, &FindOptions::new().sort_asc("segment"))
        .await
        .map_err(db_error("read_segments"))?;
    docs.into_iter()
        .map(from_document)
        .collect::<Result<Vec<_>, _>>()
        .map_err(db_error("read_segments"))
}

/// Events at or after `from_version`, or `None` when the stream has no head.
async fn load_events(
    inner: &StreamInner,
    aggregate_id: &AggregateId,
    from_version: u64,
) -> StoreResult<Option<Vec<Event>>> {
    let Some(head) = read_head(inner, aggregate_id).await? else {
        return Ok(None);
    };
    let mut events = Vec::new();
    if head.segments > 0 {
        for segment in read_segments(inner, aggregate_id, from_version).await? {
            events.extend(
                segment
                    .events
                    .into_iter()
                    .filter(|e| e.version >= from_version)
                    .map(|e| e.into_event(*aggregate_id, &head.stream_type)),
            );
        }
    }
    events.extend(
        head.events
            .into_iter()
            .filter(|e| e.version >= from_version)
            .map(|e| e.into_event(*aggregate_id, &head.stream_type)),
    );
    Ok(Some(sort_dedup(events)))
}

async fn split_stream(
    inner: &Arc<StreamInner>,
    aggregate_id: AggregateId,
) -> StoreResult<Option<u64>> {
    let threshold = inner.config.split_threshold;

    for _ in 0..SPLIT_ATTEMPTS {
        let Some(mut head) = read_head(inner, &aggregate_id).await? else {
            return Ok(None);
        };
        let len = head.events.len();
        if len <= threshold {
            inner.pending.lock().insert(aggregate_id, len);
            return Ok(None);
        }

        let keep = inner.config.retain_after_split.min(len);
        let kept = head.events.split_off(len.saturating_sub(keep));
        let moved = std::mem::take(&mut head.events);
        let (Some(from_version), Some(to_version)) = (
            moved.first().map(|e| e.version),
            moved.last().map(|e| e.version),
        ) else {
            return Ok(None);
        };
        let number = head.segments.saturating_add(1);
        let segment = SegmentDocument {
            id: segment_id(&aggregate_id, number),
            aggregate_id,
            stream_type: head.stream_type.clone(),
            segment: number,
            from_version,
            to_version,
            events: moved,
            created_at: Utc::now(),
        };

        if !write_segment(inner, &segment).await? {
            return Ok(None);
        }

        let filter = head_filter(&aggregate_id)
            .and(Filter::eq("version", head.version))
            .and(Filter::eq("segments", head.segments));
        let update = Update::new()
            .set("events", entries_value(&kept)?)
            .set("segments", number)
            .set("updatedAt", timefmt::format(&Utc::now()));
        let matched = inner
            .collection
            .update_one(&filter, &update)
            .await
            .map_err(db_error("split"))?;
        if matched == 1 {
            inner.pending.lock().insert(aggregate_id, kept.len());
            tracing::info!(
                aggregate_id = %aggregate_id,
                segment = number,
                moved = segment.events.len(),
                kept = kept.len(),
                "Moved stream events into continuation document"
            );
            return Ok(Some(number));
        }

        discard_segment(inner, &aggregate_id, number).await?;
    }
    Ok(None)
}

/// Insert a segment, adopting an orphan left by an interrupted split.
///
/// Returns `false` when the head already references this segment number,
/// meaning another splitter finished first.
async fn write_segment(inner: &StreamInner, segment: &SegmentDocument) -> StoreResult<bool> {
    let doc = to_document(segment).map_err(db_error("split"))?;
    match inner.collection.insert_one(doc).await {
        Ok(()) => Ok(true),
        Err(DbError::DuplicateKey { .. }) => {
            let head_segments = read_head(inner, &segment.aggregate_id)
                .await?
                .map_or(u64::MAX, |h| h.segments);
            if head_segments >= segment.segment {
                return Ok(false);
            }

            let existing: Option<SegmentDocument> = inner
                .collection
                .find_one(&Filter::eq(ID_FIELD, segment.id.clone()), &FindOptions::new())
                .await
                .map_err(db_error("split"))?
                .map(from_document)
                .transpose()
                .map_err(db_error("split"))?;

            let mut by_version: BTreeMap<u64, StreamEntry> = BTreeMap::new();
            for entry in existing
                .into_iter()
                .flat_map(|s| s.events)
                .chain(segment.events.iter().cloned())
            {
                by_version.entry(entry.version).or_insert(entry);
            }
            let mut adopted = segment.clone();
            adopted.events = by_version.into_values().collect();
            if let (Some(first), Some(last)) = (adopted.events.first(), adopted.events.last()) {
                adopted.from_version = first.version;
                adopted.to_version = last.version;
            }
            inner
                .collection
                .replace_one(
                    &Filter::eq(ID_FIELD, segment.id.clone()),
                    to_document(&adopted).map_err(db_error("split"))?,
                    true,
                )
                .await
                .map_err(db_error("split"))?;
            tracing::warn!(
                aggregate_id = %segment.aggregate_id,
                segment = segment.segment,
                "Adopted orphaned stream segment"
            );
            Ok(true)
        }
        Err(e) => Err(db_error("split")(e)),
    }
}

/// Remove a segment written by a split that lost its CAS, unless the head
/// has since come to reference that segment number.
async fn discard_segment(
    inner: &StreamInner,
    aggregate_id: &AggregateId,
    number: u64,
) -> StoreResult<()> {
    let head_segments = read_head(inner, aggregate_id)
        .await?
        .map_or(0, |h| h.segments);
    if head_segments < number {
        inner
            .collection
            .delete_many(&Filter::eq(ID_FIELD, segment_id(aggregate_id, number)))
            .await
            .map_err(db_error("split"))?;
    }
    Ok(())
}

#[async_trait]
impl EventStore for StreamEventStore {
    async fn save(&self, events: &[Event], expected_version: u64) -> StoreResult<()> {
        let Some((aggregate_id, new_version)) = validate_batch(events, expected_version)? else {
            return Ok(());
        };
        let entries: Vec<StreamEntry> = events.iter().map(StreamEntry::from_event).collect();
        let appended = entries.len();
        let oldest = events.iter().map(|e| e.timestamp).min();
        let now = Utc::now();

        if expected_version == 0 {
            let stream_type = events
                .first()
                .map_or(self.inner.config.stream_type.as_str(), |e| self.stream_type_for(e))
                .to_owned();
            let head = StreamDocument {
                id: aggregate_id.to_string(),
                stream_name: format!("{stream_type}-{aggregate_id}"),
                stream_type,
                aggregate_id,
                version: new_version,
                event_count: u64::try_from(appended).unwrap_or(u64::MAX),
                segments: 0,
                oldest_event_at: oldest,
                events: entries,
                created_at: now,
                updated_at: now,
            };
            let doc = to_document(&head).map_err(db_error("save"))?;
            match self.inner.collection.insert_one(doc).await {
                Ok(()) => {}
                Err(DbError::DuplicateKey { .. }) => {
                    let actual = self.current_version(&aggregate_id).await?;
                    return Err(StoreError::conflict(aggregate_id, 0, actual));
                }
                Err(e) => return Err(db_error("save")(e)),
            }
        } else {
            let filter = head_filter(&aggregate_id).and(Filter::eq("version", expected_version));
            let update = Update::new()
                .push(
                    "events",
                    entries
                        .iter()
                        .map(serde_json::to_value)
                        .collect::<Result<Vec<_>, _>>()?,
                )
                .set("version", new_version)
                .inc("eventCount", i64::try_from(appended).unwrap_or(i64::MAX))
                .set("updatedAt", timefmt::format(&now))
                .set_if_missing("oldestEventAt", timestamp_value(oldest));
            let matched = self
                .inner
                .collection
                .update_one(&filter, &update)
                .await
                .map_err(db_error("save"))?;
            if matched == 0 {
                let actual = self.current_version(&aggregate_id).await?;
                return Err(StoreError::conflict(aggregate_id, expected_version, actual));
            }
        }

        tracing::debug!(
            aggregate_id = %aggregate_id,
            count = appended,
            version = new_version,
            "Appended events to stream"
        );
        self.track_append(aggregate_id, expected_version, appended);
        Ok(())
    }

    async fn load_from(
        &self,
        aggregate_id: &AggregateId,
        from_version: u64,
    ) -> StoreResult<Vec<Event>> {
        Ok(load_events(&self.inner, aggregate_id, from_version.max(1))
            .await?
            .unwrap_or_default())
    }

    async fn current_version(&self, aggregate_id: &AggregateId) -> StoreResult<u64> {
        let doc = self
            .inner
            .collection
            .find_one(&head_filter(aggregate_id), &FindOptions::new().project(&["version"]))
            .await
            .map_err(db_error("current_version"))?;
        Ok(doc
            .and_then(|d| d.get("version").and_then(Value::as_u64))
            .unwrap_or(0))
    }

    async fn aggregate_ids(&self) -> StoreResult<Vec<AggregateId>> {
        let values = self
            .inner
            .collection
            .distinct("aggregateId", &Filter::exists("streamName", true))
            .await
            .map_err(db_error("aggregate_ids"))?;
        Ok(parse_aggregate_ids(values))
    }

    fn strategy(&self) -> StorageStrategy {
        StorageStrategy::Stream
    }

    async fn close(&self) -> StoreResult<()> {
        self.inner.pending.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::arithmetic_side_effects)]
mod tests {
    use chronicle_db::MemoryCollection;
    use chronicle_types::ErrorKind;

    use super::*;

    fn events(id: AggregateId, from: u64, count: u64) -> Vec<Event> {
        (from..from + count)
            .map(|v| Event::new(id, "guild", "MemberJoined", v, format!("e{v}").into_bytes()))
            .collect()
    }

    async fn store(collection: &Arc<MemoryCollection>, threshold: usize, retain: usize) -> StreamEventStore {
        let dyn_collection: Arc<dyn DocumentCollection> = collection.clone();
        StreamEventStore::new(dyn_collection, StreamConfig::default().with_split(threshold, retain))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn append_is_compare_and_swap_on_version() {
        let collection = Arc::new(MemoryCollection::new("streams"));
        let store = store(&collection, 1000, 100).await;
        let id = AggregateId::new();

        store.save(&events(id, 1, 2), 0).await.unwrap();
        let err = store.save(&events(id, 2, 1), 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConcurrencyConflict);
        assert!(matches!(
            err,
            StoreError::ConcurrencyConflict { expected: 1, actual: 2, .. }
        ));
        assert_eq!(store.load(&id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn second_creator_of_a_stream_conflicts() {
        let collection = Arc::new(MemoryCollection::new("streams"));
        let store = store(&collection, 1000, 100).await;
        let id = AggregateId::new();
        store.save(&events(id, 1, 1), 0).await.unwrap();
        assert!(store.save(&events(id, 1, 1), 0).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn head_document_has_the_persisted_shape() {
        let collection = Arc::new(MemoryCollection::new("streams"));
        let store = store(&collection, 1000, 100).await;
        let id = AggregateId::new();
        store.save(&events(id, 1, 2), 0).await.unwrap();

        let docs = collection.snapshot();
        let head = &docs[0];
        assert_eq!(head["id"], Value::from(id.to_string()));
        assert_eq!(head["streamName"], Value::from(format!("guild-{id}")));
        assert_eq!(head["version"], Value::from(2));
        assert_eq!(head["events"].as_array().unwrap().len(), 2);
        assert!(head["events"][0].get("eventId").is_some());
    }

    #[tokio::test]
    async fn explicit_split_moves_old_events_without_loss() {
        let collection = Arc::new(MemoryCollection::new("streams"));
        let store = store(&collection, 1000, 2).await;
        let id = AggregateId::new();
        store.save(&events(id, 1, 5), 0).await.unwrap();

        // Below the threshold nothing happens.
        assert_eq!(store.split(&id).await.unwrap(), None);

        let small = self::store(&collection, 3, 2).await;
        assert_eq!(small.split(&id).await.unwrap(), Some(1));

        let loaded = small.load(&id).await.unwrap();
        let versions: Vec<u64> = loaded.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![1, 2, 3, 4, 5]);
        assert_eq!(collection.len(), 2);

        small.save(&events(id, 6, 1), 5).await.unwrap();
        assert_eq!(small.load_from(&id, 3).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn appends_trigger_background_split() {
        let collection = Arc::new(MemoryCollection::new("streams"));
        let store = store(&collection, 4, 1).await;
        let id = AggregateId::new();
        store.save(&events(id, 1, 3), 0).await.unwrap();
        store.save(&events(id, 4, 3), 3).await.unwrap();

        for _ in 0..100 {
            if collection.len() > 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(collection.len(), 2);
        let versions: Vec<u64> = store.load(&id).await.unwrap().iter().map(|e| e.version).collect();
        assert_eq!(versions, (1..=6).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn orphaned_segment_is_adopted_and_loads_dedupe() {
        let collection = Arc::new(MemoryCollection::new("streams"));
        let writer = store(&collection, 1000, 100).await;
        let splitter = store(&collection, 3, 1).await;
        let id = AggregateId::new();
        writer.save(&events(id, 1, 2), 0).await.unwrap();

        // A split that crashed after writing its segment.
        let orphan = SegmentDocument {
            id: segment_id(&id, 1),
            aggregate_id: id,
            stream_type: "guild".to_owned(),
            segment: 1,
            from_version: 1,
            to_version: 1,
            events: events(id, 1, 1).iter().map(StreamEntry::from_event).collect(),
            created_at: Utc::now(),
        };
        collection.insert_one(to_document(&orphan).unwrap()).await.unwrap();

        writer.save(&events(id, 3, 2), 2).await.unwrap();
        assert_eq!(splitter.split(&id).await.unwrap(), Some(1));

        let versions: Vec<u64> = writer.load(&id).await.unwrap().iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn remove_through_keeps_version_counter() {
        let collection = Arc::new(MemoryCollection::new("streams"));
        let store = store(&collection, 1000, 100).await;
        let splitter = StreamEventStore::new(
            collection.clone(),
            StreamConfig::default().with_split(3, 1),
        )
        .await
        .unwrap();
        let id = AggregateId::new();
        store.save(&events(id, 1, 5), 0).await.unwrap();
        assert_eq!(splitter.split(&id).await.unwrap(), Some(1));

        let removed = store.remove_through(&id, 3).await.unwrap();
        assert_eq!(removed, 3);
        let versions: Vec<u64> = store.load_from(&id, 1).await.unwrap().iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![4, 5]);
        assert_eq!(store.current_version(&id).await.unwrap(), 5);

        store.save(&events(id, 6, 1), 5).await.unwrap();
        assert_eq!(store.current_version(&id).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn aged_events_are_an_oldest_prefix() {
        let collection = Arc::new(MemoryCollection::new("streams"));
        let store = store(&collection, 1000, 100).await;
        let id = AggregateId::new();
        let old = Utc::now() - chrono::Duration::days(10);
        let mut batch = events(id, 1, 3);
        batch[0].timestamp = old;
        batch[1].timestamp = old;
        store.save(&batch, 0).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(1);
        assert_eq!(store.archive_candidates(cutoff, 10).await.unwrap(), vec![id]);
        let aged = store.aged_events(&id, cutoff).await.unwrap();
        assert_eq!(aged.iter().map(|e| e.version).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn retain_must_be_below_threshold() {
        assert!(StreamConfig::default().with_split(10, 10).validate().is_err());
        assert!(StreamConfig::default().with_split(0, 0).validate().is_err());
        assert!(StreamConfig::default().validate().is_ok());
    }
}
