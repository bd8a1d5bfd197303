//! The [`DocumentCollection`] capability every backend implements.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::document::{Document, FindOptions, Filter, IndexSpec, Update, VersionGuard};
use crate::error::DbError;

/// Result of [`DocumentCollection::replace_one`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaceOutcome {
    /// Number of documents that matched the filter (0 or 1).
    pub matched: u64,
    /// Whether a new document was inserted.
    pub upserted: bool,
}

/// A named set of JSON documents keyed by their string `id`.
///
/// Implementations:
/// - [`MemoryCollection`](crate::MemoryCollection): in-process, for tests and
///   development
/// - [`PostgresCollection`](crate::PostgresCollection): one JSONB table per
///   collection
///
/// Multi-document writes ([`insert_many`](Self::insert_many),
/// [`insert_many_guarded`](Self::insert_many_guarded)) are atomic: either all
/// documents are stored or none are. Single-document updates are atomic
/// with respect to their filter, which is what makes compare-and-swap on a
/// version field safe without any in-process lock.
#[async_trait]
pub trait DocumentCollection: Send + Sync {
    /// Collection name.
    fn name(&self) -> &str;

    /// Create an index if it does not exist yet.
    async fn ensure_index(&self, index: &IndexSpec) -> Result<(), DbError>;

    /// Insert a single document.
    ///
    /// Fails with [`DbError::DuplicateKey`] if the id or a unique index key
    /// already exists.
    async fn insert_one(&self, doc: Document) -> Result<(), DbError> {
        self.insert_many(vec![doc]).await
    }

    /// Insert documents atomically.
    async fn insert_many(&self, docs: Vec<Document>) -> Result<(), DbError>;

    /// Insert documents atomically if `guard` holds at write time.
    ///
    /// Fails with [`DbError::GuardFailed`] carrying the actual maximum when
    /// it does not, and with [`DbError::DuplicateKey`] when a concurrent
    /// writer won a race on a unique index.
    async fn insert_many_guarded(
        &self,
        guard: &VersionGuard,
        docs: Vec<Document>,
    ) -> Result<(), DbError>;

    /// Return matching documents.
    async fn find(&self, filter: &Filter, options: &FindOptions)
    -> Result<Vec<Document>, DbError>;

    /// Return the first matching document under `options`' sort order.
    async fn find_one(
        &self,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Option<Document>, DbError> {
        let options = options.clone().limit(1);
        Ok(self.find(filter, &options).await?.into_iter().next())
    }

    /// Apply `update` to the first document (by id) matching `filter`.
    ///
    /// Returns the number of documents modified (0 or 1). A zero return from
    /// a filter that includes a version field is a failed compare-and-swap.
    async fn update_one(&self, filter: &Filter, update: &Update) -> Result<u64, DbError>;

    /// Replace the first document matching `filter`, or insert `doc` when
    /// nothing matches and `upsert` is set.
    async fn replace_one(
        &self,
        filter: &Filter,
        doc: Document,
        upsert: bool,
    ) -> Result<ReplaceOutcome, DbError>;

    /// Delete every matching document, returning how many were removed.
    async fn delete_many(&self, filter: &Filter) -> Result<u64, DbError>;

    /// Count matching documents.
    async fn count(&self, filter: &Filter) -> Result<u64, DbError>;

    /// Distinct non-null values of `field` among matching documents.
    async fn distinct(&self, field: &str, filter: &Filter) -> Result<Vec<Value>, DbError>;

    /// Maximum integer value of `field` among matching documents.
    async fn max_i64(&self, field: &str, filter: &Filter) -> Result<Option<i64>, DbError>;

    /// Delete documents whose `field` timestamp lies before `now`.
    ///
    /// Backends without native expiry call this from a periodic sweep.
    async fn purge_expired(&self, field: &str, now: DateTime<Utc>) -> Result<u64, DbError> {
        let cutoff = chronicle_types::timefmt::format(&now);
        self.delete_many(&Filter::lt(field, cutoff)).await
    }
}
