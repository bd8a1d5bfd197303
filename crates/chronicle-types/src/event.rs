//! The immutable [`Event`] record and batch validation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::ids::{AggregateId, EventId};

/// String-keyed annotations carried by events and states.
pub type Metadata = BTreeMap<String, String>;

/// Default payload shape version for newly created events.
pub const INITIAL_SCHEMA_VERSION: u32 = 1;

const fn default_schema_version() -> u32 {
    INITIAL_SCHEMA_VERSION
}

/// An immutable domain fact with an aggregate-scoped version number.
///
/// Created by domain logic and never mutated once persisted. `data` is an
/// opaque serialized payload; `schema_version` describes its shape and is
/// what the event upgrader keys on, independent of the aggregate `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique event identifier.
    #[serde(rename = "eventId")]
    pub id: EventId,
    /// Aggregate this event belongs to.
    pub aggregate_id: AggregateId,
    /// Aggregate type tag (the stream type).
    #[serde(default)]
    pub aggregate_type: String,
    /// Event type tag.
    pub event_type: String,
    /// Position in the aggregate's history, starting at 1.
    pub version: u64,
    /// Payload shape version.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Opaque serialized payload.
    #[serde(with = "crate::encoding::base64_bytes")]
    pub data: Vec<u8>,
    /// When the event happened.
    #[serde(with = "crate::timefmt::serde_ts")]
    pub timestamp: DateTime<Utc>,
    /// Free-form annotations (correlation ids, user ids, ...).
    #[serde(default)]
    pub metadata: Metadata,
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_type: impl Into<String>,
        version: u64,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            id: EventId::new(),
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event_type.into(),
            version,
            schema_version: INITIAL_SCHEMA_VERSION,
            data: data.into(),
            timestamp: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Override the payload schema version.
    #[must_use]
    pub const fn with_schema_version(mut self, schema_version: u32) -> Self {
        self.schema_version = schema_version;
        self
    }

    /// Override the event timestamp.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Check the fields every store requires.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for a nil aggregate id or an empty
    /// event type, and [`StoreError::InvalidVersion`] for version 0.
    pub fn validate(&self) -> StoreResult<()> {
        if self.aggregate_id.is_nil() {
            return Err(StoreError::validation("aggregate_id", "must not be nil"));
        }
        if self.event_type.trim().is_empty() {
            return Err(StoreError::validation("event_type", "must not be empty"));
        }
        if self.version == 0 {
            return Err(StoreError::InvalidVersion {
                aggregate_id: self.aggregate_id.to_string(),
                version: 0,
                reason: "event versions start at 1".to_owned(),
            });
        }
        Ok(())
    }
}

/// Validate a batch about to be appended on top of `expected_version`.
///
/// Every event must pass [`Event::validate`], all events must belong to the
/// same aggregate, and versions must run `expected_version + 1`,
/// `expected_version + 2`, ... without gaps. Returns the aggregate id and
/// the version the stream will have after the append, or `None` for an
/// empty batch.
///
/// # Errors
///
/// Returns [`StoreError::Validation`] or [`StoreError::InvalidVersion`]
/// without touching any store.
pub fn validate_batch(
    events: &[Event],
    expected_version: u64,
) -> StoreResult<Option<(AggregateId, u64)>> {
    let Some(first) = events.first() else {
        return Ok(None);
    };
    let aggregate_id = first.aggregate_id;
    let mut next = expected_version;

    for event in events {
        event.validate()?;
        if event.aggregate_id != aggregate_id {
            return Err(StoreError::validation(
                "aggregate_id",
                format!(
                    "batch mixes aggregates {aggregate_id} and {}",
                    event.aggregate_id
                ),
            ));
        }
        next = next.checked_add(1).ok_or_else(|| StoreError::InvalidVersion {
            aggregate_id: aggregate_id.to_string(),
            version: event.version,
            reason: "version overflow".to_owned(),
        })?;
        if event.version != next {
            return Err(StoreError::InvalidVersion {
                aggregate_id: aggregate_id.to_string(),
                version: event.version,
                reason: format!("expected version {next} in batch"),
            });
        }
    }

    Ok(Some((aggregate_id, next)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::error::ErrorKind;

    fn event(id: AggregateId, version: u64) -> Event {
        Event::new(id, "guild", "MemberJoined", version, b"{}".to_vec())
    }

    #[test]
    fn batch_must_continue_from_expected_version() {
        let id = AggregateId::new();
        let batch = vec![event(id, 3), event(id, 4)];
        assert_eq!(validate_batch(&batch, 2).unwrap(), Some((id, 4)));

        let err = validate_batch(&batch, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidVersion);
    }

    #[test]
    fn batch_rejects_gaps() {
        let id = AggregateId::new();
        let batch = vec![event(id, 1), event(id, 3)];
        assert_eq!(
            validate_batch(&batch, 0).unwrap_err().kind(),
            ErrorKind::InvalidVersion
        );
    }

    #[test]
    fn batch_rejects_mixed_aggregates() {
        let batch = vec![event(AggregateId::new(), 1), event(AggregateId::new(), 2)];
        assert_eq!(
            validate_batch(&batch, 0).unwrap_err().kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn empty_batch_is_noop() {
        assert_eq!(validate_batch(&[], 7).unwrap(), None);
    }

    #[test]
    fn nil_id_and_empty_type_are_rejected() {
        let nil = event(AggregateId::from(Uuid::nil()), 1);
        assert_eq!(nil.validate().unwrap_err().kind(), ErrorKind::Validation);

        let mut untyped = event(AggregateId::new(), 1);
        untyped.event_type = "  ".to_owned();
        assert_eq!(untyped.validate().unwrap_err().kind(), ErrorKind::Validation);
    }

    #[test]
    fn serializes_with_document_field_names() {
        let e = event(AggregateId::new(), 1).with_metadata("correlationId", "c-1");
        let json = serde_json::to_value(&e).unwrap();
        assert!(json.get("eventId").is_some());
        assert_eq!(json["eventType"], "MemberJoined");
        assert_eq!(json["data"], "e30=");
        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back, e);
    }
}
