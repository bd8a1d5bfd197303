//! Storage metrics and per-store operation counters.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use chronicle_types::StateSummary;
use serde::Serialize;

/// Per-aggregate-type breakdown inside [`StorageMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMetrics {
    /// Rows of this type.
    pub count: u64,
    /// Stored bytes of this type.
    pub total_size: u64,
}

/// Aggregate statistics over stored snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageMetrics {
    /// Number of rows.
    pub total_count: u64,
    /// Stored bytes over all rows.
    pub total_size: u64,
    /// Payload bytes before transforms.
    pub original_size: u64,
    /// Mean stored size, rounded down.
    pub average_size: u64,
    /// Smallest stored row.
    pub min_size: u64,
    /// Largest stored row.
    pub max_size: u64,
    /// Breakdown keyed by aggregate type.
    pub by_type: BTreeMap<String, TypeMetrics>,
    /// Oldest snapshot timestamp.
    pub oldest: Option<DateTime<Utc>>,
    /// Newest snapshot timestamp.
    pub newest: Option<DateTime<Utc>>,
}

impl StorageMetrics {
    /// Fold summaries into metrics.
    pub fn from_summaries<'a>(summaries: impl IntoIterator<Item = &'a StateSummary>) -> Self {
        let mut metrics = Self::default();
        let mut min = u64::MAX;
        for s in summaries {
            metrics.total_count = metrics.total_count.saturating_add(1);
            metrics.total_size = metrics.total_size.saturating_add(s.stored_size);
            metrics.original_size = metrics.original_size.saturating_add(s.original_size);
            min = min.min(s.stored_size);
            metrics.max_size = metrics.max_size.max(s.stored_size);

            let entry = metrics.by_type.entry(s.aggregate_type.clone()).or_default();
            entry.count = entry.count.saturating_add(1);
            entry.total_size = entry.total_size.saturating_add(s.stored_size);

            metrics.oldest = Some(metrics.oldest.map_or(s.timestamp, |t| t.min(s.timestamp)));
            metrics.newest = Some(metrics.newest.map_or(s.timestamp, |t| t.max(s.timestamp)));
        }
        if let Some(average) = metrics.total_size.checked_div(metrics.total_count) {
            metrics.min_size = min;
            metrics.average_size = average;
        }
        metrics
    }

    /// Stored bytes divided by original bytes, when anything is stored.
    #[allow(clippy::cast_precision_loss)]
    pub fn storage_ratio(&self) -> Option<f64> {
        (self.original_size > 0).then(|| self.total_size as f64 / self.original_size as f64)
    }
}

/// Lock-free operation counters.
#[derive(Debug, Default)]
pub struct OperationStats {
    saves: AtomicU64,
    loads: AtomicU64,
    deletes: AtomicU64,
    bytes_in: AtomicU64,
    bytes_stored: AtomicU64,
    bytes_out: AtomicU64,
    sweeps: AtomicU64,
    sweep_failures: AtomicU64,
    swept_rows: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of [`OperationStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    /// Successful saves.
    pub saves: u64,
    /// Successful loads.
    pub loads: u64,
    /// Rows deleted by callers.
    pub deletes: u64,
    /// Payload bytes accepted by saves.
    pub bytes_in: u64,
    /// Bytes written after transforms.
    pub bytes_stored: u64,
    /// Payload bytes returned by loads.
    pub bytes_out: u64,
    /// Retention sweeps completed.
    pub sweeps: u64,
    /// Retention sweeps that failed.
    pub sweep_failures: u64,
    /// Rows removed by retention.
    pub swept_rows: u64,
    /// Failed store operations.
    pub errors: u64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

fn len_u64(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}

impl OperationStats {
    /// Record a save of `original` payload bytes stored as `stored` bytes.
    pub fn record_save(&self, original: usize, stored: usize) {
        bump(&self.saves, 1);
        bump(&self.bytes_in, len_u64(original));
        bump(&self.bytes_stored, len_u64(stored));
    }

    /// Record a load returning `bytes` payload bytes.
    pub fn record_load(&self, bytes: usize) {
        bump(&self.loads, 1);
        bump(&self.bytes_out, len_u64(bytes));
    }

    /// Record caller-initiated deletion of `rows`.
    pub fn record_delete(&self, rows: u64) {
        bump(&self.deletes, rows);
    }

    /// Record a retention sweep.
    pub fn record_sweep(&self, removed: u64) {
        bump(&self.sweeps, 1);
        bump(&self.swept_rows, removed);
    }

    /// Record a failed retention sweep.
    pub fn record_sweep_failure(&self) {
        bump(&self.sweep_failures, 1);
    }

    /// Record a failed operation.
    pub fn record_error(&self) {
        bump(&self.errors, 1);
    }

    /// Read every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        let read = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            saves: read(&self.saves),
            loads: read(&self.loads),
            deletes: read(&self.deletes),
            bytes_in: read(&self.bytes_in),
            bytes_stored: read(&self.bytes_stored),
            bytes_out: read(&self.bytes_out),
            sweeps: read(&self.sweeps),
            sweep_failures: read(&self.sweep_failures),
            swept_rows: read(&self.swept_rows),
            errors: read(&self.errors),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::arithmetic_side_effects)]
mod tests {
    use chronicle_types::AggregateId;

    use super::*;

    fn summary(kind: &str, version: u64, stored: u64, at: DateTime<Utc>) -> StateSummary {
        StateSummary {
            aggregate_id: AggregateId::new(),
            aggregate_type: kind.to_owned(),
            version,
            timestamp: at,
            original_size: stored * 2,
            stored_size: stored,
            compression: Some("gzip".to_owned()),
            encryption: None,
        }
    }

    #[test]
    fn folds_sizes_types_and_timestamps() {
        let now = Utc::now();
        let earlier = now - chrono::Duration::minutes(5);
        let rows = [
            summary("guild", 1, 10, earlier),
            summary("guild", 2, 30, now),
            summary("player", 1, 20, now),
        ];
        let m = StorageMetrics::from_summaries(&rows);
        assert_eq!(m.total_count, 3);
        assert_eq!(m.total_size, 60);
        assert_eq!(m.average_size, 20);
        assert_eq!(m.min_size, 10);
        assert_eq!(m.max_size, 30);
        assert_eq!(m.by_type["guild"], TypeMetrics { count: 2, total_size: 40 });
        assert_eq!(m.oldest, Some(earlier));
        assert_eq!(m.newest, Some(now));
        assert_eq!(m.storage_ratio(), Some(0.5));
    }

    #[test]
    fn empty_input_yields_zeroes() {
        let m = StorageMetrics::from_summaries(&Vec::<StateSummary>::new());
        assert_eq!(m, StorageMetrics::default());
        assert!(m.storage_ratio().is_none());
    }

    #[test]
    fn huge_sizes_saturate_instead_of_wrapping() {
        let now = Utc::now();
        let mut big = summary("guild", 1, 0, now);
        big.stored_size = u64::MAX;
        big.original_size = u64::MAX;
        let rows = [big.clone(), big];
        let m = StorageMetrics::from_summaries(&rows);
        assert_eq!(m.total_size, u64::MAX);
        assert_eq!(m.original_size, u64::MAX);
        assert_eq!(m.by_type["guild"].total_size, u64::MAX);
        assert_eq!(m.average_size, u64::MAX / 2);
        assert_eq!(m.min_size, u64::MAX);
    }

    #[test]
    fn counters_accumulate() {
        let stats = OperationStats::default();
        stats.record_save(100, 40);
        stats.record_save(10, 10);
        stats.record_load(100);
        stats.record_sweep(2);
        stats.record_sweep_failure();
        let snap = stats.snapshot();
        assert_eq!(snap.saves, 2);
        assert_eq!(snap.bytes_in, 110);
        assert_eq!(snap.bytes_stored, 50);
        assert_eq!(snap.loads, 1);
        assert_eq!(snap.swept_rows, 2);
        assert_eq!(snap.sweep_failures, 1);
    }
}
