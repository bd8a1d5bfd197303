//! Store-to-store event migration.
//!
//! [`EventStoreMigrator`] copies whole streams from a source [`EventStore`]
//! into a target of any strategy. A fixed pool of workers pulls aggregate
//! ids from a shared queue. Each stream copy resumes from the target's
//! current version, so rerunning after an interruption only copies what is
//! missing. Progress is kept in atomics and can be read while a run is in
//! flight.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chronicle_events::EventStore;
use chronicle_types::{AggregateId, StoreError, StoreResult};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

/// Default number of concurrent stream copies.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default number of events per target write.
pub const DEFAULT_MIGRATION_BATCH_SIZE: usize = 500;

/// Settings for [`EventStoreMigrator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationConfig {
    /// Streams copied concurrently.
    pub concurrency: usize,
    /// Events per target write.
    pub batch_size: usize,
    /// Compare event count and `(type, version)` pairs after each copy.
    pub verify: bool,
    /// Record failed streams and keep going instead of stopping the run.
    pub continue_on_error: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            batch_size: DEFAULT_MIGRATION_BATCH_SIZE,
            verify: false,
            continue_on_error: false,
        }
    }
}

impl MigrationConfig {
    /// Reject zero concurrency or batch size.
    pub fn validate(&self) -> StoreResult<()> {
        if self.concurrency == 0 {
            return Err(StoreError::validation("concurrency", "must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(StoreError::validation("batch_size", "must be at least 1"));
        }
        Ok(())
    }
}

/// Live counters for the current (or last) run.
#[derive(Debug, Default)]
pub struct MigrationProgress {
    total_streams: AtomicU64,
    processed_streams: AtomicU64,
    failed_streams: AtomicU64,
    total_events: AtomicU64,
    processed_events: AtomicU64,
    started: Mutex<Option<Instant>>,
}

/// Point-in-time copy of [`MigrationProgress`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    /// Streams in the run.
    pub total_streams: u64,
    /// Streams finished, successfully or not.
    pub processed_streams: u64,
    /// Streams that failed.
    pub failed_streams: u64,
    /// Events held by the source streams when the run started.
    pub total_events: u64,
    /// Events copied or found already present in the target.
    pub processed_events: u64,
    /// Time since the run started.
    pub elapsed: Duration,
    /// Estimated time to completion, once anything was processed.
    pub eta: Option<Duration>,
}

impl ProgressSnapshot {
    /// Share of events processed, 0 to 100.
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self) -> f64 {
        if self.total_events == 0 {
            return if self.processed_streams >= self.total_streams {
                100.0
            } else {
                0.0
            };
        }
        (self.processed_events as f64 / self.total_events as f64 * 100.0).min(100.0)
    }
}

impl MigrationProgress {
    fn reset(&self, streams: u64, events: u64) {
        self.total_streams.store(streams, Ordering::Release);
        self.total_events.store(events, Ordering::Release);
        self.processed_streams.store(0, Ordering::Release);
        self.failed_streams.store(0, Ordering::Release);
        self.processed_events.store(0, Ordering::Release);
        *self.started.lock() = Some(Instant::now());
    }

    fn add_events(&self, n: u64) {
        self.processed_events.fetch_add(n, Ordering::AcqRel);
    }

    fn finish_stream(&self, failed: bool) {
        self.processed_streams.fetch_add(1, Ordering::AcqRel);
        if failed {
            self.failed_streams.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Read the counters and estimate the remaining time.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let elapsed = self.started.lock().map_or(Duration::ZERO, |t| t.elapsed());
        let total_events = self.total_events.load(Ordering::Acquire);
        let processed_events = self.processed_events.load(Ordering::Acquire);

        // Event counts stay far below 2^52, so the f64 ratio is exact enough.
        #[allow(clippy::cast_precision_loss)]
        let eta = (processed_events > 0).then(|| {
            let remaining = total_events.saturating_sub(processed_events);
            let ratio = remaining as f64 / processed_events as f64;
            Duration::try_from_secs_f64(elapsed.as_secs_f64() * ratio).unwrap_or(Duration::MAX)
        });

        ProgressSnapshot {
            total_streams: self.total_streams.load(Ordering::Acquire),
            processed_streams: self.processed_streams.load(Ordering::Acquire),
            failed_streams: self.failed_streams.load(Ordering::Acquire),
            total_events,
            processed_events,
            elapsed,
            eta,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Every stream was copied (and verified, if asked).
    Completed,
    /// The run finished but some streams failed.
    CompletedWithErrors,
    /// A stream failed and the run stopped early.
    Aborted,
}

/// A stream that could not be migrated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamFailure {
    /// The stream.
    pub aggregate_id: AggregateId,
    /// What went wrong.
    pub error: String,
}

/// Outcome of [`EventStoreMigrator::migrate`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationResult {
    /// How the run ended.
    pub status: MigrationStatus,
    /// Streams queued.
    pub streams_total: u64,
    /// Streams copied without error.
    pub streams_migrated: u64,
    /// Events written to the target.
    pub events_copied: u64,
    /// Events already present in the target.
    pub events_skipped: u64,
    /// Failed streams, in completion order.
    pub failures: Vec<StreamFailure>,
    /// Wall-clock duration.
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, Default)]
struct StreamOutcome {
    copied: u64,
    skipped: u64,
}

struct Shared {
    source: Arc<dyn EventStore>,
    target: Arc<dyn EventStore>,
    config: MigrationConfig,
    progress: Arc<MigrationProgress>,
    abort: AtomicBool,
}

/// Copies streams between two event stores.
#[derive(Clone)]
pub struct EventStoreMigrator {
    shared: Arc<Shared>,
}

impl EventStoreMigrator {
    /// Create a migrator.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for an invalid configuration.
    pub fn new(
        source: Arc<dyn EventStore>,
        target: Arc<dyn EventStore>,
        config: MigrationConfig,
    ) -> StoreResult<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                source,
                target,
                config,
                progress: Arc::new(MigrationProgress::default()),
                abort: AtomicBool::new(false),
            }),
        })
    }

    /// Handle to the live progress counters.
    pub fn progress(&self) -> Arc<MigrationProgress> {
        Arc::clone(&self.shared.progress)
    }

    /// Migrate every stream the source knows about.
    pub async fn migrate_all(&self) -> StoreResult<MigrationResult> {
        let ids = self.shared.source.aggregate_ids().await?;
        self.migrate(ids).await
    }

    /// Migrate the given streams.
    ///
    /// # Errors
    ///
    /// Fails only when the source cannot be sized up front. Stream failures
    /// are reported in the result.
    pub async fn migrate(&self, ids: Vec<AggregateId>) -> StoreResult<MigrationResult> {
        let shared = &self.shared;
        let started = Instant::now();

        let mut total_events: u64 = 0;
        for id in &ids {
            let version = shared.source.current_version(id).await?;
            total_events = total_events.saturating_add(version);
        }
        let streams_total = u64::try_from(ids.len()).unwrap_or(u64::MAX);
        shared.progress.reset(streams_total, total_events);
        shared.abort.store(false, Ordering::Release);

        tracing::info!(
            source = %shared.source.strategy(),
            target = %shared.target.strategy(),
            streams = streams_total,
            events = total_events,
            concurrency = shared.config.concurrency,
            "Event migration started"
        );

        let workers = shared.config.concurrency.min(ids.len());
        let (tx, mut rx) = mpsc::channel(ids.len().max(1));
        let queue = Arc::new(Mutex::new(VecDeque::from(ids)));

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let shared = Arc::clone(shared);
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                while !shared.abort.load(Ordering::Acquire) {
                    let next = queue.lock().pop_front();
                    let Some(id) = next else {
                        break;
                    };
                    let outcome = migrate_stream(&shared, &id).await;
                    shared.progress.finish_stream(outcome.is_err());
                    if outcome.is_err() && !shared.config.continue_on_error {
                        shared.abort.store(true, Ordering::Release);
                    }
                    if tx.send((id, outcome)).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(tx);

        let mut result = MigrationResult {
            status: MigrationStatus::Completed,
            streams_total,
            streams_migrated: 0,
            events_copied: 0,
            events_skipped: 0,
            failures: Vec::new(),
            elapsed: Duration::ZERO,
        };
        while let Some((aggregate_id, outcome)) = rx.recv().await {
            match outcome {
                Ok(outcome) => {
                    result.streams_migrated = result.streams_migrated.saturating_add(1);
                    result.events_copied = result.events_copied.saturating_add(outcome.copied);
                    result.events_skipped = result.events_skipped.saturating_add(outcome.skipped);
                }
                Err(e) => {
                    tracing::warn!(aggregate_id = %aggregate_id, error = %e, "Stream migration failed");
                    result.failures.push(StreamFailure {
                        aggregate_id,
                        error: e.to_string(),
                    });
                }
            }
        }
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Migration worker ended abnormally");
                shared.abort.store(true, Ordering::Release);
            }
        }

        result.status = if shared.abort.load(Ordering::Acquire) {
            MigrationStatus::Aborted
        } else if result.failures.is_empty() {
            MigrationStatus::Completed
        } else {
            MigrationStatus::CompletedWithErrors
        };
        result.elapsed = started.elapsed();

        tracing::info!(
            status = ?result.status,
            migrated = result.streams_migrated,
            failed = result.failures.len(),
            copied = result.events_copied,
            skipped = result.events_skipped,
            elapsed_ms = u64::try_from(result.elapsed.as_millis()).unwrap_or(u64::MAX),
            "Event migration finished"
        );
        Ok(result)
    }
}

impl std::fmt::Debug for EventStoreMigrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStoreMigrator")
            .field("source", &self.shared.source.strategy())
            .field("target", &self.shared.target.strategy())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

fn to_u64(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

async fn migrate_stream(shared: &Shared, id: &AggregateId) -> StoreResult<StreamOutcome> {
    let source_version = shared.source.current_version(id).await?;
    let mut expected = shared.target.current_version(id).await?;
    if expected > source_version {
        return Err(StoreError::InvalidVersion {
            aggregate_id: id.to_string(),
            version: expected,
            reason: format!("target is ahead of source version {source_version}"),
        });
    }

    let mut outcome = StreamOutcome {
        copied: 0,
        skipped: expected,
    };
    shared.progress.add_events(expected);

    if expected < source_version {
        let events = shared.source.load_from(id, expected.saturating_add(1)).await?;
        for chunk in events.chunks(shared.config.batch_size) {
            shared.target.save(chunk, expected).await?;
            let n = to_u64(chunk.len());
            expected = expected.saturating_add(n);
            outcome.copied = outcome.copied.saturating_add(n);
            shared.progress.add_events(n);
        }
    }

    if shared.config.verify && source_version > 0 {
        verify_stream(shared, id).await?;
    }
    tracing::debug!(
        aggregate_id = %id,
        copied = outcome.copied,
        skipped = outcome.skipped,
        "Stream migrated"
    );
    Ok(outcome)
}

async fn verify_stream(shared: &Shared, id: &AggregateId) -> StoreResult<()> {
    let source = shared.source.load(id).await?;
    let target = shared.target.load(id).await?;
    if source.len() != target.len() {
        return Err(StoreError::validation(
            "verification",
            format!(
                "stream {id} has {} events in source but {} in target",
                source.len(),
                target.len()
            ),
        ));
    }
    let mismatch = source
        .iter()
        .zip(&target)
        .find(|(s, t)| s.version != t.version || s.event_type != t.event_type);
    if let Some((s, t)) = mismatch {
        return Err(StoreError::validation(
            "verification",
            format!(
                "stream {id} differs: source has {}@{} where target has {}@{}",
                s.event_type, s.version, t.event_type, t.version
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    #[test]
    fn config_rejects_zeroes() {
        let zero_workers = MigrationConfig {
            concurrency: 0,
            ..MigrationConfig::default()
        };
        assert!(zero_workers.validate().is_err());
        let zero_batch = MigrationConfig {
            batch_size: 0,
            ..MigrationConfig::default()
        };
        assert!(zero_batch.validate().is_err());
        assert!(MigrationConfig::default().validate().is_ok());
    }

    #[test]
    fn eta_scales_with_remaining_work() {
        let progress = MigrationProgress::default();
        assert_eq!(progress.snapshot().eta, None);

        progress.reset(2, 100);
        progress.add_events(25);
        let snap = progress.snapshot();
        assert_eq!(snap.processed_events, 25);
        assert!((snap.percent() - 25.0).abs() < f64::EPSILON);
        // Three quarters remain, so the estimate is three times the elapsed time.
        let eta = snap.eta.unwrap();
        assert!(eta >= snap.elapsed * 2);
    }

    #[test]
    fn empty_runs_report_complete() {
        let progress = MigrationProgress::default();
        progress.reset(0, 0);
        assert!((progress.snapshot().percent() - 100.0).abs() < f64::EPSILON);
    }
}
