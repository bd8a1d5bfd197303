//! In-place payload upgrades over a raw document collection.
//!
//! [`SchemaMigrator`] walks every document in id order, a batch at a time,
//! and recognises three shapes:
//!
//! - stream heads and segments (an `events` array of entries)
//! - per-event rows (`eventType` and `data` at the top level)
//! - state snapshots (`aggregateType` and `data`) stored without
//!   compression or encryption, keyed by `(aggregateType, documentVersion)`
//!
//! Anything else, including transformed snapshots, is skipped. A document is
//! written back only when at least one schema version moved, under a
//! compare-and-swap on the fields concurrent writers change. A lost swap is
//! counted as a conflict and the document is left for the next run.

use std::sync::Arc;

use chrono::Utc;
use chronicle_db::{DocumentCollection, Document, FindOptions, Filter, ID_FIELD, Update, document_id};
use chronicle_types::{INITIAL_SCHEMA_VERSION, StoreError, StoreResult, encoding, timefmt};
use serde::Serialize;
use serde_json::Value;

use crate::upgrader::EventUpgrader;

/// Default number of documents read per batch.
pub const DEFAULT_SCHEMA_BATCH_SIZE: usize = 100;

/// Head fields guarding a stream write-back. Appends move `version`, splits
/// move `segments` and `eventCount`, and every append, split or trim stamps
/// `updatedAt`.
const STREAM_CAS_FIELDS: [&str; 4] = ["version", "segments", "eventCount", "updatedAt"];

/// Settings for [`SchemaMigrator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaMigrationConfig {
    /// Documents read per batch.
    pub batch_size: usize,
    /// Compute upgrades without writing them.
    pub dry_run: bool,
}

impl Default for SchemaMigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_SCHEMA_BATCH_SIZE,
            dry_run: false,
        }
    }
}

/// Counters from one [`SchemaMigrator::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaMigrationReport {
    /// Documents examined.
    pub processed: u64,
    /// Documents whose payloads moved to a newer schema version (in a dry
    /// run, documents that would have).
    pub upgraded: u64,
    /// Individual event or state payloads upgraded.
    pub payloads_upgraded: u64,
    /// Documents of an unknown shape or with transformed payloads.
    pub skipped: u64,
    /// Documents whose upgrade or write-back failed.
    pub errors: u64,
    /// Documents changed by another writer between read and write-back.
    pub conflicts: u64,
    /// Whether nothing was written.
    pub dry_run: bool,
}

enum Shape {
    Stream,
    Event,
    State,
    Unknown,
}

fn shape_of(doc: &Document) -> Shape {
    let is_str = |field: &str| doc.get(field).is_some_and(Value::is_string);
    let is_set = |field: &str| doc.get(field).is_some_and(|v| !v.is_null());

    if doc.get("events").is_some_and(Value::is_array) {
        Shape::Stream
    } else if is_str("eventType") && is_str("data") {
        Shape::Event
    } else if is_str("aggregateType") && is_str("data") {
        if is_set("compression") || is_set("encryption") {
            Shape::Unknown
        } else {
            Shape::State
        }
    } else {
        Shape::Unknown
    }
}

fn schema_version_of(value: Option<&Value>) -> u32 {
    value
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(INITIAL_SCHEMA_VERSION)
}

fn decode_payload(subject: &str, raw: &str) -> StoreResult<Vec<u8>> {
    encoding::decode(raw).map_err(|e| {
        StoreError::validation("data", format!("payload of {subject} is not base64: {e}"))
    })
}

/// What a rewrite of one document produced.
struct Rewrite {
    update: Update,
    guard: Filter,
    payloads: u64,
}

/// Upgrades stored payloads in place.
pub struct SchemaMigrator {
    collection: Arc<dyn DocumentCollection>,
    upgrader: EventUpgrader,
    config: SchemaMigrationConfig,
}

impl SchemaMigrator {
    /// Create a migrator over `collection`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for a zero batch size.
    pub fn new(
        collection: Arc<dyn DocumentCollection>,
        upgrader: EventUpgrader,
        config: SchemaMigrationConfig,
    ) -> StoreResult<Self> {
        if config.batch_size == 0 {
            return Err(StoreError::validation("batch_size", "must be at least 1"));
        }
        Ok(Self {
            collection,
            upgrader,
            config,
        })
    }

    /// Walk the whole collection once.
    ///
    /// # Errors
    ///
    /// Fails only when a batch cannot be read. Per-document failures are
    /// counted in the report.
    pub async fn run(&self) -> StoreResult<SchemaMigrationReport> {
        let mut report = SchemaMigrationReport {
            dry_run: self.config.dry_run,
            ..SchemaMigrationReport::default()
        };
        tracing::info!(
            collection = self.collection.name(),
            dry_run = self.config.dry_run,
            "Schema migration started"
        );

        let mut after: Option<String> = None;
        loop {
            let filter = after
                .as_ref()
                .map_or(Filter::All, |id| Filter::gt(ID_FIELD, id.clone()));
            let batch = self
                .collection
                .find(&filter, &FindOptions::new().limit(self.config.batch_size))
                .await
                .map_err(|e| StoreError::from(e).with_operation("schema migration scan"))?;
            let Some(last) = batch.last() else {
                break;
            };
            after = Some(document_id(last).map_err(StoreError::from)?.to_owned());
            let full = batch.len() == self.config.batch_size;

            for doc in &batch {
                self.process(doc, &mut report).await;
            }
            if !full {
                break;
            }
        }

        tracing::info!(
            collection = self.collection.name(),
            processed = report.processed,
            upgraded = report.upgraded,
            skipped = report.skipped,
            errors = report.errors,
            conflicts = report.conflicts,
            "Schema migration finished"
        );
        Ok(report)
    }

    async fn process(&self, doc: &Document, report: &mut SchemaMigrationReport) {
        report.processed = report.processed.saturating_add(1);
        let id = match document_id(doc) {
            Ok(id) => id.to_owned(),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping document without an id");
                report.errors = report.errors.saturating_add(1);
                return;
            }
        };

        let rewrite = match shape_of(doc) {
            Shape::Stream => self.rewrite_stream(&id, doc),
            Shape::Event => self.rewrite_event(&id, doc),
            Shape::State => self.rewrite_state(&id, doc),
            Shape::Unknown => {
                report.skipped = report.skipped.saturating_add(1);
                return;
            }
        };
        let rewrite = match rewrite {
            Ok(Some(rewrite)) => rewrite,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(document_id = %id, error = %e, "Payload upgrade failed");
                report.errors = report.errors.saturating_add(1);
                return;
            }
        };

        if self.config.dry_run {
            report.upgraded = report.upgraded.saturating_add(1);
            report.payloads_upgraded = report.payloads_upgraded.saturating_add(rewrite.payloads);
            return;
        }
        match self.collection.update_one(&rewrite.guard, &rewrite.update).await {
            Ok(0) => {
                tracing::debug!(document_id = %id, "Document changed during upgrade, left as is");
                report.conflicts = report.conflicts.saturating_add(1);
            }
            Ok(_) => {
                tracing::debug!(document_id = %id, payloads = rewrite.payloads, "Document upgraded");
                report.upgraded = report.upgraded.saturating_add(1);
                report.payloads_upgraded = report.payloads_upgraded.saturating_add(rewrite.payloads);
            }
            Err(e) => {
                tracing::warn!(document_id = %id, error = %e, "Upgrade write-back failed");
                report.errors = report.errors.saturating_add(1);
            }
        }
    }

    fn rewrite_stream(&self, id: &str, doc: &Document) -> StoreResult<Option<Rewrite>> {
        let Some(Value::Array(entries)) = doc.get("events") else {
            return Ok(None);
        };
        let mut upgraded = entries.clone();
        let mut payloads: u64 = 0;

        for entry in &mut upgraded {
            let Some(fields) = entry.as_object_mut() else {
                continue;
            };
            let (Some(event_type), Some(raw)) = (
                fields.get("eventType").and_then(Value::as_str),
                fields.get("data").and_then(Value::as_str),
            ) else {
                continue;
            };
            let from = schema_version_of(fields.get("schemaVersion"));
            if !self.upgrader.has_upgrade(event_type, from) {
                continue;
            }
            let data = decode_payload(id, raw)?;
            let (data, to) = self.upgrader.upgrade(id, event_type, from, &data)?;
            fields.insert("data".to_owned(), Value::String(encoding::encode(&data)));
            fields.insert("schemaVersion".to_owned(), Value::from(to));
            payloads = payloads.saturating_add(1);
        }
        if payloads == 0 {
            return Ok(None);
        }

        let mut guard = Filter::eq(ID_FIELD, id);
        for field in STREAM_CAS_FIELDS {
            if let Some(value) = doc.get(field) {
                guard = guard.and(Filter::eq(field, value.clone()));
            }
        }
        Ok(Some(Rewrite {
            update: Update::new().set("events", Value::Array(upgraded)),
            guard,
            payloads,
        }))
    }

    fn rewrite_event(&self, id: &str, doc: &Document) -> StoreResult<Option<Rewrite>> {
        let (Some(event_type), Some(raw)) = (
            doc.get("eventType").and_then(Value::as_str),
            doc.get("data").and_then(Value::as_str),
        ) else {
            return Ok(None);
        };
        let from = schema_version_of(doc.get("schemaVersion"));
        if !self.upgrader.has_upgrade(event_type, from) {
            return Ok(None);
        }
        let data = decode_payload(id, raw)?;
        let (data, to) = self.upgrader.upgrade(id, event_type, from, &data)?;

        Ok(Some(Rewrite {
            update: Update::new()
                .set("data", encoding::encode(&data))
                .set("schemaVersion", to),
            guard: Self::version_guard(id, doc, "schemaVersion"),
            payloads: 1,
        }))
    }

    fn rewrite_state(&self, id: &str, doc: &Document) -> StoreResult<Option<Rewrite>> {
        let (Some(aggregate_type), Some(raw)) = (
            doc.get("aggregateType").and_then(Value::as_str),
            doc.get("data").and_then(Value::as_str),
        ) else {
            return Ok(None);
        };
        let from = schema_version_of(doc.get("documentVersion"));
        if !self.upgrader.has_upgrade(aggregate_type, from) {
            return Ok(None);
        }
        let data = decode_payload(id, raw)?;
        let (data, to) = self.upgrader.upgrade(id, aggregate_type, from, &data)?;
        let size = u64::try_from(data.len()).unwrap_or(u64::MAX);

        Ok(Some(Rewrite {
            update: Update::new()
                .set("data", encoding::encode(&data))
                .set("documentVersion", to)
                .set("systemMetadata.originalSize", size)
                .set("systemMetadata.storedSize", size)
                .set("updatedAt", timefmt::format(&Utc::now())),
            guard: Self::version_guard(id, doc, "documentVersion"),
            payloads: 1,
        }))
    }

    /// Match the document only while `field` still holds what was read.
    fn version_guard(id: &str, doc: &Document, field: &str) -> Filter {
        let current = doc.get(field).map_or_else(
            || Filter::exists(field, false),
            |value| Filter::eq(field, value.clone()),
        );
        Filter::eq(ID_FIELD, id).and(current)
    }
}

impl std::fmt::Debug for SchemaMigrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaMigrator")
            .field("collection", &self.collection.name())
            .field("upgrader", &self.upgrader)
            .field("config", &self.config)
            .finish()
    }
}
