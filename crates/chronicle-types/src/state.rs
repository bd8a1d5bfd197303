//! Point-in-time aggregate snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::event::{INITIAL_SCHEMA_VERSION, Metadata};
use crate::ids::AggregateId;

/// A materialized snapshot of an aggregate at a given version.
///
/// One state row exists per `(aggregate_id, version)`. Versions need not be
/// contiguous. A new version is a new row; rows are never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateState {
    /// Aggregate this snapshot belongs to.
    pub aggregate_id: AggregateId,
    /// Aggregate type tag.
    pub aggregate_type: String,
    /// Version the snapshot was taken at.
    pub version: u64,
    /// Shape version of the serialized snapshot.
    #[serde(default = "initial_schema_version")]
    pub schema_version: u32,
    /// Opaque serialized snapshot.
    #[serde(with = "crate::encoding::base64_bytes")]
    pub data: Vec<u8>,
    /// Free-form annotations.
    #[serde(default)]
    pub metadata: Metadata,
    /// When the snapshot was taken.
    #[serde(with = "crate::timefmt::serde_ts")]
    pub timestamp: DateTime<Utc>,
}

const fn initial_schema_version() -> u32 {
    INITIAL_SCHEMA_VERSION
}

impl AggregateState {
    /// Create a snapshot stamped with the current time.
    pub fn new(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        version: u64,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            version,
            schema_version: INITIAL_SCHEMA_VERSION,
            data: data.into(),
            metadata: Metadata::new(),
            timestamp: Utc::now(),
        }
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set the snapshot's shape version.
    #[must_use]
    pub const fn with_schema_version(mut self, schema_version: u32) -> Self {
        self.schema_version = schema_version;
        self
    }

    /// Override the snapshot timestamp.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Check the required fields before any I/O.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for a nil aggregate id or an empty
    /// aggregate type.
    pub fn validate(&self) -> StoreResult<()> {
        if self.aggregate_id.is_nil() {
            return Err(StoreError::validation("aggregate_id", "must not be nil"));
        }
        if self.aggregate_type.trim().is_empty() {
            return Err(StoreError::validation("aggregate_type", "must not be empty"));
        }
        Ok(())
    }
}

/// Payload-free description of a stored state row.
///
/// Returned by state listings and consumed by retention policies, so that
/// deciding what to delete never requires decrypting payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSummary {
    /// Aggregate the row belongs to.
    pub aggregate_id: AggregateId,
    /// Aggregate type tag.
    pub aggregate_type: String,
    /// Snapshot version.
    pub version: u64,
    /// Snapshot timestamp.
    #[serde(with = "crate::timefmt::serde_ts")]
    pub timestamp: DateTime<Utc>,
    /// Payload size before any transform.
    pub original_size: u64,
    /// Payload size as stored (after compression and encryption).
    pub stored_size: u64,
    /// Compression algorithm, if applied.
    pub compression: Option<String>,
    /// Encryption cipher, if applied.
    pub encryption: Option<String>,
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn validate_requires_id_and_type() {
        let ok = AggregateState::new(AggregateId::new(), "guild", 0, Vec::new());
        assert!(ok.validate().is_ok());

        let nil = AggregateState::new(AggregateId::from(Uuid::nil()), "guild", 1, Vec::new());
        assert!(matches!(nil.validate().map_err(|e| e.kind()), Err(ErrorKind::Validation)));

        let untyped = AggregateState::new(AggregateId::new(), "", 1, Vec::new());
        assert!(matches!(untyped.validate().map_err(|e| e.kind()), Err(ErrorKind::Validation)));
    }
}
