//! Retention policies for historical snapshots.
//!
//! A policy is a pure function over the summaries of one aggregate's
//! snapshots and the current instant. It returns the subset that may be
//! deleted and keeps no state of its own. The store applies the result and
//! always spares the newest version, whatever the policy says, plus the
//! version a save just wrote when the sweep follows that save.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chronicle_types::{AggregateId, StateSummary, StoreError, StoreResult};
use serde::{Deserialize, Serialize};

/// A rule selecting snapshots that may be deleted.
pub trait RetentionPolicy: Send + Sync + fmt::Debug {
    /// Short human-readable description, used in logs.
    fn name(&self) -> String;

    /// Judge a single snapshot in isolation.
    ///
    /// Count-based policies cannot decide without the full set and keep
    /// everything here.
    fn should_keep(&self, state: &StateSummary, now: DateTime<Utc>) -> bool;

    /// The snapshots of one aggregate that may be deleted, newest first.
    fn cleanup_candidates(&self, states: &[StateSummary], now: DateTime<Utc>)
    -> Vec<StateSummary>;
}

fn newest_first(states: &[StateSummary]) -> Vec<StateSummary> {
    let mut sorted = states.to_vec();
    sorted.sort_by(|a, b| b.version.cmp(&a.version));
    sorted
}

/// Keep the newest `count` versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepLastN {
    count: usize,
}

impl KeepLastN {
    /// Keep `count` versions.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for a zero count.
    pub fn new(count: usize) -> StoreResult<Self> {
        if count == 0 {
            return Err(StoreError::validation("retention.count", "must be positive"));
        }
        Ok(Self { count })
    }
}

impl RetentionPolicy for KeepLastN {
    fn name(&self) -> String {
        format!("keep_last({})", self.count)
    }

    fn should_keep(&self, _state: &StateSummary, _now: DateTime<Utc>) -> bool {
        true
    }

    fn cleanup_candidates(
        &self,
        states: &[StateSummary],
        _now: DateTime<Utc>,
    ) -> Vec<StateSummary> {
        newest_first(states).into_iter().skip(self.count).collect()
    }
}

/// Delete snapshots older than a maximum age, regardless of count.
///
/// The policy itself reports every aged snapshot, but
/// [`DocumentStateStore`](crate::DocumentStateStore) never deletes an
/// aggregate's newest version. When every snapshot is older than the cutoff,
/// the newest one therefore survives the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBased {
    max_age: chrono::Duration,
}

impl TimeBased {
    /// Expire snapshots older than `max_age`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for a zero or unrepresentable age.
    pub fn new(max_age: Duration) -> StoreResult<Self> {
        if max_age.is_zero() {
            return Err(StoreError::validation("retention.max_age", "must be positive"));
        }
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| StoreError::validation("retention.max_age", e.to_string()))?;
        Ok(Self { max_age })
    }

    fn expired(&self, state: &StateSummary, now: DateTime<Utc>) -> bool {
        now.checked_sub_signed(self.max_age)
            .is_some_and(|cutoff| state.timestamp < cutoff)
    }
}

impl RetentionPolicy for TimeBased {
    fn name(&self) -> String {
        format!("time_based({}s)", self.max_age.num_seconds())
    }

    fn should_keep(&self, state: &StateSummary, now: DateTime<Utc>) -> bool {
        !self.expired(state, now)
    }

    fn cleanup_candidates(&self, states: &[StateSummary], now: DateTime<Utc>) -> Vec<StateSummary> {
        newest_first(states)
            .into_iter()
            .filter(|s| self.expired(s, now))
            .collect()
    }
}

/// Keep the newest snapshots whose stored sizes fit a byte budget.
///
/// Sizes accumulate from the newest version down. The snapshot that pushes
/// the total over the budget, and every older one, are candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeBased {
    max_bytes: u64,
}

impl SizeBased {
    /// Budget of `max_bytes` stored bytes per aggregate.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for a zero budget.
    pub fn new(max_bytes: u64) -> StoreResult<Self> {
        if max_bytes == 0 {
            return Err(StoreError::validation("retention.max_bytes", "must be positive"));
        }
        Ok(Self { max_bytes })
    }
}

impl RetentionPolicy for SizeBased {
    fn name(&self) -> String {
        format!("size_based({}B)", self.max_bytes)
    }

    fn should_keep(&self, state: &StateSummary, _now: DateTime<Utc>) -> bool {
        state.stored_size <= self.max_bytes
    }

    fn cleanup_candidates(
        &self,
        states: &[StateSummary],
        _now: DateTime<Utc>,
    ) -> Vec<StateSummary> {
        let mut total = 0u64;
        let mut exceeded = false;
        newest_first(states)
            .into_iter()
            .filter(|s| {
                if !exceeded {
                    total = total.saturating_add(s.stored_size);
                    exceeded = total > self.max_bytes;
                }
                exceeded
            })
            .collect()
    }
}

/// How a [`Composite`] combines its parts' candidate sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeMode {
    /// Intersection: a candidate under every part.
    All,
    /// Union: a candidate under any part.
    Any,
}

/// Combination of two or more policies.
#[derive(Debug, Clone)]
pub struct Composite {
    mode: CompositeMode,
    policies: Vec<Arc<dyn RetentionPolicy>>,
}

impl Composite {
    /// Combine `policies` under `mode`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for fewer than two parts.
    pub fn new(mode: CompositeMode, policies: Vec<Arc<dyn RetentionPolicy>>) -> StoreResult<Self> {
        if policies.len() < 2 {
            return Err(StoreError::validation(
                "retention.policies",
                "a composite policy needs at least two parts",
            ));
        }
        Ok(Self { mode, policies })
    }
}

type SnapshotKey = (AggregateId, u64);

const fn key_of(state: &StateSummary) -> SnapshotKey {
    (state.aggregate_id, state.version)
}

impl RetentionPolicy for Composite {
    fn name(&self) -> String {
        let parts: Vec<String> = self.policies.iter().map(|p| p.name()).collect();
        let joiner = match self.mode {
            CompositeMode::All => " and ",
            CompositeMode::Any => " or ",
        };
        format!("({})", parts.join(joiner))
    }

    fn should_keep(&self, state: &StateSummary, now: DateTime<Utc>) -> bool {
        match self.mode {
            CompositeMode::All => self.policies.iter().any(|p| p.should_keep(state, now)),
            CompositeMode::Any => self.policies.iter().all(|p| p.should_keep(state, now)),
        }
    }

    fn cleanup_candidates(&self, states: &[StateSummary], now: DateTime<Utc>) -> Vec<StateSummary> {
        let sets: Vec<HashSet<SnapshotKey>> = self
            .policies
            .iter()
            .map(|p| p.cleanup_candidates(states, now).iter().map(key_of).collect())
            .collect();
        newest_first(states)
            .into_iter()
            .filter(|s| {
                let key = key_of(s);
                match self.mode {
                    CompositeMode::All => sets.iter().all(|set| set.contains(&key)),
                    CompositeMode::Any => sets.iter().any(|set| set.contains(&key)),
                }
            })
            .collect()
    }
}

/// Serializable retention settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RetentionConfig {
    /// Keep everything.
    #[default]
    None,
    /// See [`KeepLastN`].
    KeepLast {
        /// Versions kept.
        count: usize,
    },
    /// See [`TimeBased`].
    TimeBased {
        /// Maximum age in seconds.
        max_age_secs: u64,
    },
    /// See [`SizeBased`].
    SizeBased {
        /// Stored-byte budget per aggregate.
        max_bytes: u64,
    },
    /// Intersection of the parts' candidates.
    All {
        /// Parts.
        policies: Vec<RetentionConfig>,
    },
    /// Union of the parts' candidates.
    Any {
        /// Parts.
        policies: Vec<RetentionConfig>,
    },
}

impl RetentionConfig {
    /// Check the settings without building anything.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for zero limits, composites with
    /// fewer than two parts, or a `none` part inside a composite.
    pub fn validate(&self) -> StoreResult<()> {
        self.build().map(|_| ())
    }

    /// Build the policy, or `None` when retention is off.
    ///
    /// # Errors
    ///
    /// See [`RetentionConfig::validate`].
    pub fn build(&self) -> StoreResult<Option<Arc<dyn RetentionPolicy>>> {
        let policy: Arc<dyn RetentionPolicy> = match self {
            Self::None => return Ok(None),
            Self::KeepLast { count } => Arc::new(KeepLastN::new(*count)?),
            Self::TimeBased { max_age_secs } => {
                Arc::new(TimeBased::new(Duration::from_secs(*max_age_secs))?)
            }
            Self::SizeBased { max_bytes } => Arc::new(SizeBased::new(*max_bytes)?),
            Self::All { policies } => Arc::new(Self::composite(CompositeMode::All, policies)?),
            Self::Any { policies } => Arc::new(Self::composite(CompositeMode::Any, policies)?),
        };
        Ok(Some(policy))
    }

    fn composite(mode: CompositeMode, parts: &[Self]) -> StoreResult<Composite> {
        let built = parts
            .iter()
            .map(|part| {
                part.build()?.ok_or_else(|| {
                    StoreError::validation("retention.policies", "'none' cannot be a composite part")
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;
        Composite::new(mode, built)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::arithmetic_side_effects)]
mod tests {
    use chronicle_types::ErrorKind;

    use super::*;

    fn summaries(id: AggregateId, now: DateTime<Utc>, sizes: &[u64]) -> Vec<StateSummary> {
        // Version v is (len - v) hours old.
        let len = i64::try_from(sizes.len()).unwrap();
        sizes
            .iter()
            .zip(1u64..)
            .map(|(size, version)| StateSummary {
                aggregate_id: id,
                aggregate_type: "guild".to_owned(),
                version,
                timestamp: now - chrono::Duration::hours(len - i64::try_from(version).unwrap()),
                original_size: *size,
                stored_size: *size,
                compression: None,
                encryption: None,
            })
            .collect()
    }

    fn versions(states: &[StateSummary]) -> Vec<u64> {
        states.iter().map(|s| s.version).collect()
    }

    #[test]
    fn keep_last_n_spares_the_newest() {
        let now = Utc::now();
        let states = summaries(AggregateId::new(), now, &[10; 5]);
        let policy = KeepLastN::new(3).unwrap();
        assert_eq!(versions(&policy.cleanup_candidates(&states, now)), vec![2, 1]);
        assert!(KeepLastN::new(10).unwrap().cleanup_candidates(&states, now).is_empty());
    }

    #[test]
    fn time_based_ignores_count() {
        let now = Utc::now();
        let states = summaries(AggregateId::new(), now, &[10; 5]);
        // Ages: v1=4h, v2=3h, v3=2h, v4=1h, v5=0h.
        let policy = TimeBased::new(Duration::from_secs(90 * 60)).unwrap();
        assert_eq!(versions(&policy.cleanup_candidates(&states, now)), vec![3, 2, 1]);
        assert!(policy.should_keep(&states[4], now));
        assert!(!policy.should_keep(&states[0], now));
    }

    #[test]
    fn size_based_cuts_at_the_budget() {
        let now = Utc::now();
        let states = summaries(AggregateId::new(), now, &[40, 40, 40, 40, 40]);
        // Newest first: 40, 80, 120 > 100 -> v3 and older.
        let policy = SizeBased::new(100).unwrap();
        assert_eq!(versions(&policy.cleanup_candidates(&states, now)), vec![3, 2, 1]);
        assert!(policy.should_keep(&states[0], now));
    }

    #[test]
    fn composite_all_intersects_and_any_unites() {
        let now = Utc::now();
        let states = summaries(AggregateId::new(), now, &[10; 5]);
        let keep_two: Arc<dyn RetentionPolicy> = Arc::new(KeepLastN::new(2).unwrap());
        let old: Arc<dyn RetentionPolicy> =
            Arc::new(TimeBased::new(Duration::from_secs(150 * 60)).unwrap());

        // keep_two -> {3,2,1}; old (older than 2.5h) -> {2,1}.
        let all = Composite::new(CompositeMode::All, vec![keep_two.clone(), old.clone()]).unwrap();
        assert_eq!(versions(&all.cleanup_candidates(&states, now)), vec![2, 1]);

        let any = Composite::new(CompositeMode::Any, vec![keep_two, old]).unwrap();
        assert_eq!(versions(&any.cleanup_candidates(&states, now)), vec![3, 2, 1]);
        assert!(any.name().contains(" or "));
    }

    #[test]
    fn invalid_policies_are_rejected() {
        assert_eq!(KeepLastN::new(0).unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(SizeBased::new(0).unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(TimeBased::new(Duration::ZERO).unwrap_err().kind(), ErrorKind::Validation);
        let single = vec![Arc::new(KeepLastN::new(1).unwrap()) as Arc<dyn RetentionPolicy>];
        assert!(Composite::new(CompositeMode::All, single).is_err());
    }

    #[test]
    fn config_builds_nested_policies() {
        let config: RetentionConfig = serde_json::from_value(serde_json::json!({
            "policy": "any",
            "policies": [
                {"policy": "keep_last", "count": 10},
                {"policy": "time_based", "max_age_secs": 86400}
            ]
        }))
        .unwrap();
        let policy = config.build().unwrap().unwrap();
        assert_eq!(policy.name(), "(keep_last(10) or time_based(86400s))");
        assert!(RetentionConfig::None.build().unwrap().is_none());
    }

    #[test]
    fn config_rejects_none_inside_composite() {
        let config = RetentionConfig::All {
            policies: vec![RetentionConfig::None, RetentionConfig::KeepLast { count: 1 }],
        };
        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::Validation);
    }
}
