//! Hybrid strategy: a hot stream store in front of a cold archive.
//!
//! Writes always go to the hot [`StreamEventStore`]. Its head document keeps
//! the stream's `version` counter even after old events are archived, so
//! compare-and-swap appends stay correct no matter how much history has
//! moved. Reads take the hot events first and the cold events second, then
//! merge and re-sort by version; callers never see the split, even when an
//! archive pass runs between the two reads.
//!
//! The [`Archiver`] moves aged events from hot to cold on a fixed interval.
//! A pass copies the oldest contiguous run of aged events into the cold
//! store, skipping what the cold store already holds, then trims the hot
//! store. A crash between the two steps only leaves duplicates, which the
//! merge drops. Archival failures are logged and retried on the next pass;
//! hot data stays authoritative until archived.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use chronicle_types::{AggregateId, Event, StorageStrategy, StoreError, StoreResult};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::store::{EventStore, sort_dedup};
use crate::stream::StreamEventStore;

/// Default pause between archive passes.
pub const DEFAULT_ARCHIVE_INTERVAL: Duration = Duration::from_secs(300);

/// Default age after which events are archived.
pub const DEFAULT_ARCHIVE_AGE: Duration = Duration::from_secs(7 * 24 * 3600);

/// Default number of streams examined per pass.
pub const DEFAULT_ARCHIVE_BATCH: usize = 100;

/// Configuration for the [`Archiver`].
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// Pause between passes.
    pub interval: Duration,
    /// Events older than this are archived.
    pub age_threshold: Duration,
    /// Streams examined per pass.
    pub batch_size: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_ARCHIVE_INTERVAL,
            age_threshold: DEFAULT_ARCHIVE_AGE,
            batch_size: DEFAULT_ARCHIVE_BATCH,
        }
    }
}

/// Outcome of one archive pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveReport {
    /// Streams with aged events found.
    pub streams_scanned: usize,
    /// Streams whose aged events were moved.
    pub streams_archived: usize,
    /// Events copied into the cold store.
    pub events_archived: usize,
    /// Streams whose archival failed (retried next pass).
    pub failures: usize,
    /// The pass was skipped because another was already running.
    pub skipped: bool,
}

struct ArchiverInner {
    hot: StreamEventStore,
    cold: Arc<dyn EventStore>,
    config: ArchiveConfig,
    /// Set while a pass runs; guards against overlapping passes.
    in_pass: AtomicBool,
    passes: AtomicU64,
    shutdown: Notify,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Background task moving aged events from the hot to the cold store.
///
/// A first-class lifecycle object: [`start`](Self::start) spawns the
/// interval loop, [`stop`](Self::stop) ends it, and
/// [`run_once`](Self::run_once) performs a single pass on demand. Passes
/// never overlap, whether triggered by the loop or by a caller.
#[derive(Clone)]
pub struct Archiver {
    inner: Arc<ArchiverInner>,
}

impl Archiver {
    /// Create a stopped archiver.
    pub fn new(hot: StreamEventStore, cold: Arc<dyn EventStore>, config: ArchiveConfig) -> Self {
        Self {
            inner: Arc::new(ArchiverInner {
                hot,
                cold,
                config,
                in_pass: AtomicBool::new(false),
                passes: AtomicU64::new(0),
                shutdown: Notify::new(),
                handle: Mutex::new(None),
            }),
        }
    }

    /// Start the interval loop. Does nothing if it is already running.
    pub fn start(&self) {
        let mut handle = self.inner.handle.lock();
        if handle.is_some() {
            return;
        }
        let archiver = self.clone();
        let interval = self.inner.config.interval;
        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = archiver.inner.shutdown.notified() => break,
                    _ = ticker.tick() => {
                        let report = archiver.run_once().await;
                        if report.events_archived > 0 || report.failures > 0 {
                            tracing::info!(
                                streams = report.streams_archived,
                                events = report.events_archived,
                                failures = report.failures,
                                "Archive pass finished"
                            );
                        }
                    }
                }
            }
        }));
        tracing::info!(
            interval_secs = interval.as_secs(),
            age_secs = self.inner.config.age_threshold.as_secs(),
            "Archiver started"
        );
    }

    /// Stop the interval loop and wait for the current pass to finish.
    pub async fn stop(&self) {
        let handle = self.inner.handle.lock().take();
        if let Some(handle) = handle {
            self.inner.shutdown.notify_one();
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Archiver task ended abnormally");
            }
            tracing::info!("Archiver stopped");
        }
    }

    /// Whether the interval loop is running.
    pub fn is_running(&self) -> bool {
        self.inner.handle.lock().is_some()
    }

    /// Number of completed passes.
    pub fn passes(&self) -> u64 {
        self.inner.passes.load(Ordering::Acquire)
    }

    /// Run one archive pass now.
    ///
    /// Never fails: per-stream errors are logged and counted in
    /// [`ArchiveReport::failures`].
    pub async fn run_once(&self) -> ArchiveReport {
        if self
            .inner
            .in_pass
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Archive pass already running, skipping");
            return ArchiveReport {
                skipped: true,
                ..ArchiveReport::default()
            };
        }

        let report = self.pass().await;
        self.inner.in_pass.store(false, Ordering::Release);
        self.inner.passes.fetch_add(1, Ordering::AcqRel);
        report
    }

    async fn pass(&self) -> ArchiveReport {
        let mut report = ArchiveReport::default();
        let age = chrono::Duration::from_std(self.inner.config.age_threshold)
            .unwrap_or_else(|_| chrono::Duration::weeks(5200));
        let cutoff = Utc::now()
            .checked_sub_signed(age)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let candidates = match self
            .inner
            .hot
            .archive_candidates(cutoff, self.inner.config.batch_size)
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(error = %e, "Listing archive candidates failed");
                report.failures = 1;
                return report;
            }
        };

        for aggregate_id in candidates {
            report.streams_scanned = report.streams_scanned.saturating_add(1);
            match self.archive_stream(&aggregate_id, cutoff).await {
                Ok(0) => {}
                Ok(count) => {
                    report.streams_archived = report.streams_archived.saturating_add(1);
                    report.events_archived = report.events_archived.saturating_add(count);
                }
                Err(e) => {
                    report.failures = report.failures.saturating_add(1);
                    tracing::warn!(
                        aggregate_id = %aggregate_id,
                        error = %e,
                        "Archiving stream failed, will retry next pass"
                    );
                }
            }
        }
        report
    }

    async fn archive_stream(
        &self,
        aggregate_id: &AggregateId,
        cutoff: chrono::DateTime<Utc>,
    ) -> StoreResult<usize> {
        let aged = self.inner.hot.aged_events(aggregate_id, cutoff).await?;
        let Some(through) = aged.last().map(|e| e.version) else {
            return Ok(0);
        };

        let cold_version = self.inner.cold.current_version(aggregate_id).await?;
        let missing: Vec<Event> = aged.into_iter().filter(|e| e.version > cold_version).collect();
        let copied = missing.len();
        if let Some(first) = missing.first() {
            if first.version != cold_version.saturating_add(1) {
                return Err(StoreError::InvalidVersion {
                    aggregate_id: aggregate_id.to_string(),
                    version: first.version,
                    reason: format!("cold store is at version {cold_version}"),
                });
            }
            self.inner.cold.save(&missing, cold_version).await?;
        }

        self.inner.hot.remove_through(aggregate_id, through).await?;
        tracing::debug!(
            aggregate_id = %aggregate_id,
            through,
            count = copied,
            "Archived events"
        );
        Ok(copied)
    }
}

/// Event store composing a hot stream store and a cold archive.
pub struct HybridEventStore {
    hot: StreamEventStore,
    cold: Arc<dyn EventStore>,
    archiver: Archiver,
}

impl HybridEventStore {
    /// Compose `hot` and `cold`. The archiver is created stopped.
    pub fn new(hot: StreamEventStore, cold: Arc<dyn EventStore>, config: ArchiveConfig) -> Self {
        let archiver = Archiver::new(hot.clone(), Arc::clone(&cold), config);
        Self {
            hot,
            cold,
            archiver,
        }
    }

    /// The archiver lifecycle object.
    pub const fn archiver(&self) -> &Archiver {
        &self.archiver
    }

    /// The hot store.
    pub const fn hot(&self) -> &StreamEventStore {
        &self.hot
    }

    /// The cold store.
    pub fn cold(&self) -> &Arc<dyn EventStore> {
        &self.cold
    }
}

#[async_trait]
impl EventStore for HybridEventStore {
    async fn save(&self, events: &[Event], expected_version: u64) -> StoreResult<()> {
        let Some(first) = events.first() else {
            return Ok(());
        };
        let aggregate_id = first.aggregate_id;

        // History may live only in the cold store (e.g. after a migration).
        if expected_version == 0 {
            let cold_version = self.cold.current_version(&aggregate_id).await?;
            if cold_version > 0 {
                return Err(StoreError::conflict(aggregate_id, 0, cold_version));
            }
        }

        match self.hot.save(events, expected_version).await {
            Err(StoreError::ConcurrencyConflict { actual: 0, .. }) if expected_version > 0 => {
                let cold_version = self.cold.current_version(&aggregate_id).await?;
                if cold_version != expected_version {
                    return Err(StoreError::conflict(aggregate_id, expected_version, cold_version));
                }
                let stream_type = if first.aggregate_type.is_empty() {
                    self.hot.config().stream_type.clone()
                } else {
                    first.aggregate_type.clone()
                };
                self.hot
                    .seed_head(&aggregate_id, &stream_type, expected_version)
                    .await?;
                self.hot.save(events, expected_version).await
            }
            other => other,
        }
    }

    async fn load_from(
        &self,
        aggregate_id: &AggregateId,
        from_version: u64,
    ) -> StoreResult<Vec<Event>> {
        // Hot before cold: archival copies to cold before trimming hot, so
        // an event missing from this hot read is already in cold.
        let mut events = self.hot.load_from(aggregate_id, from_version).await?;
        events.extend(self.cold.load_from(aggregate_id, from_version).await?);
        Ok(sort_dedup(events))
    }

    async fn current_version(&self, aggregate_id: &AggregateId) -> StoreResult<u64> {
        let hot = self.hot.current_version(aggregate_id).await?;
        let cold = self.cold.current_version(aggregate_id).await?;
        Ok(hot.max(cold))
    }

    async fn aggregate_ids(&self) -> StoreResult<Vec<AggregateId>> {
        let mut ids = self.hot.aggregate_ids().await?;
        ids.extend(self.cold.aggregate_ids().await?);
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    fn strategy(&self) -> StorageStrategy {
        StorageStrategy::Hybrid
    }

    async fn close(&self) -> StoreResult<()> {
        self.archiver.stop().await;
        self.hot.close().await?;
        self.cold.close().await
    }
}
