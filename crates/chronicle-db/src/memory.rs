//! In-process document collection.
//!
//! Holds documents in a `BTreeMap` keyed by id behind a
//! [`parking_lot::RwLock`]. Every operation takes the lock once and never
//! holds it across an `.await`, so each call is atomic in the same way a
//! single statement is atomic in `PostgreSQL`. Unique indexes are enforced
//! on insert and replace.
//!
//! [`MemoryCollection::set_available`] switches the collection into a
//! failing mode so callers can exercise their `StoreUnavailable` paths.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::collection::{DocumentCollection, ReplaceOutcome};
use crate::document::{
    Document, FindOptions, Filter, IndexSpec, Update, VersionGuard, document_id,
    get_path, page, sort_documents, values_equal,
};
use crate::error::DbError;

#[derive(Default)]
struct Inner {
    docs: BTreeMap<String, Document>,
    indexes: Vec<IndexSpec>,
}

impl Inner {
    /// Check `candidate` against stored documents (except `ignore_id`) and
    /// the documents already staged in the same batch.
    fn check_unique(
        &self,
        collection: &str,
        candidate: &Document,
        ignore_id: Option<&str>,
        staged: &[Document],
    ) -> Result<(), DbError> {
        let id = document_id(candidate)?;
        let id_taken = ignore_id != Some(id) && self.docs.contains_key(id);
        let staged_dup = staged
            .iter()
            .any(|d| document_id(d).is_ok_and(|other| other == id));
        if id_taken || staged_dup {
            return Err(DbError::DuplicateKey {
                collection: collection.to_owned(),
                key: id.to_owned(),
            });
        }

        for index in self.indexes.iter().filter(|i| i.unique) {
            let Some(key) = index.key_of(candidate) else {
                continue;
            };
            let collides = self
                .docs
                .iter()
                .filter(|(other_id, _)| ignore_id != Some(other_id.as_str()))
                .map(|(_, d)| d)
                .chain(staged.iter())
                .filter_map(|d| index.key_of(d))
                .any(|other| keys_equal(&key, &other));
            if collides {
                return Err(DbError::DuplicateKey {
                    collection: collection.to_owned(),
                    key: format!("{}={}", index.name, Value::Array(key)),
                });
            }
        }
        Ok(())
    }

    fn matching<'a>(&'a self, filter: &'a Filter) -> impl Iterator<Item = &'a Document> + 'a {
        self.docs.values().filter(move |d| filter.matches(d))
    }

    fn max_i64(&self, field: &str, filter: &Filter) -> Option<i64> {
        self.matching(filter)
            .filter_map(|d| get_path(d, field).and_then(Value::as_i64))
            .max()
    }
}

fn keys_equal(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
}

/// A [`DocumentCollection`] held entirely in memory.
pub struct MemoryCollection {
    name: String,
    inner: RwLock<Inner>,
    available: AtomicBool,
}

impl MemoryCollection {
    /// Create an empty collection.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(Inner::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle availability. While unavailable every operation fails with
    /// [`DbError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    /// Number of stored documents (ignores availability).
    pub fn len(&self) -> usize {
        self.inner.read().docs.len()
    }

    /// Whether the collection holds no documents.
    pub fn is_empty(&self) -> bool {
        self.inner.read().docs.is_empty()
    }

    /// Snapshot every stored document in id order (ignores availability).
    pub fn snapshot(&self) -> Vec<Document> {
        self.inner.read().docs.values().cloned().collect()
    }

    fn ensure_available(&self, operation: &str) -> Result<(), DbError> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(DbError::Unavailable(format!(
                "collection {} rejected {operation}",
                self.name
            )))
        }
    }

    fn insert_locked(&self, inner: &mut Inner, docs: Vec<Document>) -> Result<(), DbError> {
        let mut staged: Vec<Document> = Vec::with_capacity(docs.len());
        for doc in docs {
            inner.check_unique(&self.name, &doc, None, &staged)?;
            staged.push(doc);
        }
        for doc in staged {
            let id = document_id(&doc)?.to_owned();
            inner.docs.insert(id, doc);
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentCollection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ensure_index(&self, index: &IndexSpec) -> Result<(), DbError> {
        self.ensure_available("ensure_index")?;
        let mut inner = self.inner.write();
        if !inner.indexes.iter().any(|i| i.name == index.name) {
            inner.indexes.push(index.clone());
        }
        Ok(())
    }

    async fn insert_many(&self, docs: Vec<Document>) -> Result<(), DbError> {
        self.ensure_available("insert")?;
        let mut inner = self.inner.write();
        self.insert_locked(&mut inner, docs)
    }

    async fn insert_many_guarded(
        &self,
        guard: &VersionGuard,
        docs: Vec<Document>,
    ) -> Result<(), DbError> {
        self.ensure_available("guarded insert")?;
        let mut inner = self.inner.write();
        let actual = inner.max_i64(&guard.field, &guard.filter).unwrap_or(0);
        if actual != guard.expected {
            return Err(DbError::GuardFailed {
                expected: guard.expected,
                actual,
            });
        }
        self.insert_locked(&mut inner, docs)
    }

    async fn find(
        &self,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Document>, DbError> {
        self.ensure_available("find")?;
        let mut docs: Vec<Document> = {
            let inner = self.inner.read();
            inner.matching(filter).cloned().collect()
        };
        sort_documents(&mut docs, &options.sort);
        Ok(page(docs, options))
    }

    async fn update_one(&self, filter: &Filter, update: &Update) -> Result<u64, DbError> {
        self.ensure_available("update")?;
        let mut inner = self.inner.write();
        let Some(id) = inner
            .matching(filter)
            .next()
            .map(|d| document_id(d).map(str::to_owned))
            .transpose()?
        else {
            return Ok(0);
        };
        let Some(current) = inner.docs.get(&id) else {
            return Ok(0);
        };
        let mut updated = current.clone();
        update.apply(&mut updated)?;
        inner.check_unique(&self.name, &updated, Some(&id), &[])?;
        inner.docs.insert(id, updated);
        Ok(1)
    }

    async fn replace_one(
        &self,
        filter: &Filter,
        doc: Document,
        upsert: bool,
    ) -> Result<ReplaceOutcome, DbError> {
        self.ensure_available("replace")?;
        let mut inner = self.inner.write();
        let existing = inner
            .matching(filter)
            .next()
            .map(|d| document_id(d).map(str::to_owned))
            .transpose()?;

        match existing {
            Some(old_id) => {
                inner.check_unique(&self.name, &doc, Some(&old_id), &[])?;
                let new_id = document_id(&doc)?.to_owned();
                inner.docs.remove(&old_id);
                inner.docs.insert(new_id, doc);
                Ok(ReplaceOutcome {
                    matched: 1,
                    upserted: false,
                })
            }
            None if upsert => {
                self.insert_locked(&mut inner, vec![doc])?;
                Ok(ReplaceOutcome {
                    matched: 0,
                    upserted: true,
                })
            }
            None => Ok(ReplaceOutcome {
                matched: 0,
                upserted: false,
            }),
        }
    }

    async fn delete_many(&self, filter: &Filter) -> Result<u64, DbError> {
        self.ensure_available("delete")?;
        let mut inner = self.inner.write();
        let before = inner.docs.len();
        inner.docs.retain(|_, d| !filter.matches(d));
        let removed = before.saturating_sub(inner.docs.len());
        Ok(u64::try_from(removed).unwrap_or(u64::MAX))
    }

    async fn count(&self, filter: &Filter) -> Result<u64, DbError> {
        self.ensure_available("count")?;
        let inner = self.inner.read();
        let count = inner.matching(filter).count();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn distinct(&self, field: &str, filter: &Filter) -> Result<Vec<Value>, DbError> {
        self.ensure_available("distinct")?;
        let inner = self.inner.read();
        let mut out: Vec<Value> = Vec::new();
        for value in inner
            .matching(filter)
            .filter_map(|d| get_path(d, field))
            .filter(|v| !v.is_null())
        {
            if !out.iter().any(|seen| values_equal(seen, value)) {
                out.push(value.clone());
            }
        }
        Ok(out)
    }

    async fn max_i64(&self, field: &str, filter: &Filter) -> Result<Option<i64>, DbError> {
        self.ensure_available("max")?;
        Ok(self.inner.read().max_i64(field, filter))
    }
}

impl std::fmt::Debug for MemoryCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCollection")
            .field("name", &self.name)
            .field("documents", &self.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => Document::new(),
        }
    }

    async fn events_collection() -> MemoryCollection {
        let c = MemoryCollection::new("events");
        c.ensure_index(&IndexSpec::new("agg_version", &["aggregateId", "version"]).unique())
            .await
            .unwrap();
        c
    }

    #[tokio::test]
    async fn insert_many_is_all_or_nothing() {
        let c = events_collection().await;
        c.insert_one(doc(json!({"id": "e1", "aggregateId": "a", "version": 1})))
            .await
            .unwrap();

        let batch = vec![
            doc(json!({"id": "e2", "aggregateId": "a", "version": 2})),
            doc(json!({"id": "e3", "aggregateId": "a", "version": 1})),
        ];
        let err = c.insert_many(batch).await.unwrap_err();
        assert!(err.is_duplicate_key());
        assert_eq!(c.len(), 1);
    }

    #[tokio::test]
    async fn guarded_insert_checks_current_maximum() {
        let c = events_collection().await;
        let guard = VersionGuard {
            filter: Filter::eq("aggregateId", "a"),
            field: "version".to_owned(),
            expected: 0,
        };
        c.insert_many_guarded(&guard, vec![doc(json!({"id": "e1", "aggregateId": "a", "version": 1}))])
            .await
            .unwrap();

        let err = c
            .insert_many_guarded(&guard, vec![doc(json!({"id": "e2", "aggregateId": "a", "version": 2}))])
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::GuardFailed { expected: 0, actual: 1 }));
        assert_eq!(c.len(), 1);
    }

    #[tokio::test]
    async fn update_one_acts_as_compare_and_swap() {
        let c = MemoryCollection::new("streams");
        c.insert_one(doc(json!({"id": "s", "version": 1}))).await.unwrap();

        let cas = Filter::eq("id", "s").and(Filter::eq("version", 1));
        let update = Update::new().set("version", 2);
        assert_eq!(c.update_one(&cas, &update).await.unwrap(), 1);
        assert_eq!(c.update_one(&cas, &update).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn replace_one_upserts() {
        let c = MemoryCollection::new("states");
        let filter = Filter::eq("id", "k");
        let first = c
            .replace_one(&filter, doc(json!({"id": "k", "v": 1})), true)
            .await
            .unwrap();
        assert!(first.upserted);

        let second = c
            .replace_one(&filter, doc(json!({"id": "k", "v": 2})), true)
            .await
            .unwrap();
        assert_eq!(second.matched, 1);
        assert_eq!(c.len(), 1);
        let stored = c.find_one(&filter, &FindOptions::new()).await.unwrap().unwrap();
        assert_eq!(stored.get("v"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn find_sorts_pages_and_projects() {
        let c = MemoryCollection::new("events");
        for v in 1..=5 {
            c.insert_one(doc(json!({"id": format!("e{v}"), "version": v, "data": "x"})))
                .await
                .unwrap();
        }
        let options = FindOptions::new().sort_desc("version").skip(1).limit(2).project(&["version"]);
        let found = c.find(&Filter::All, &options).await.unwrap();
        let versions: Vec<i64> = found.iter().filter_map(|d| d.get("version")?.as_i64()).collect();
        assert_eq!(versions, vec![4, 3]);
        assert!(found.iter().all(|d| !d.contains_key("data")));
    }

    #[tokio::test]
    async fn distinct_and_max() {
        let c = MemoryCollection::new("states");
        for (i, t) in ["guild", "member", "guild"].iter().enumerate() {
            c.insert_one(doc(json!({"id": format!("s{i}"), "aggregateType": t, "version": i})))
                .await
                .unwrap();
        }
        let types = c.distinct("aggregateType", &Filter::All).await.unwrap();
        assert_eq!(types.len(), 2);
        assert_eq!(c.max_i64("version", &Filter::All).await.unwrap(), Some(2));
        assert_eq!(c.max_i64("version", &Filter::eq("aggregateType", "none")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn purge_expired_removes_only_past_ttl() {
        let c = MemoryCollection::new("states");
        let now = chrono::Utc::now();
        let past = chronicle_types::timefmt::format(&(now - chrono::Duration::seconds(5)));
        let future = chronicle_types::timefmt::format(&(now + chrono::Duration::seconds(5)));
        c.insert_many(vec![
            doc(json!({"id": "old", "ttl": past})),
            doc(json!({"id": "new", "ttl": future})),
            doc(json!({"id": "forever"})),
        ])
        .await
        .unwrap();
        assert_eq!(c.purge_expired("ttl", now).await.unwrap(), 1);
        assert_eq!(c.len(), 2);
    }

    #[tokio::test]
    async fn unavailable_collection_rejects_calls() {
        let c = MemoryCollection::new("events");
        c.set_available(false);
        assert!(matches!(
            c.count(&Filter::All).await,
            Err(DbError::Unavailable(_))
        ));
        c.set_available(true);
        assert_eq!(c.count(&Filter::All).await.unwrap(), 0);
    }
}
