//! Opening named collections on whichever backend is configured.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::collection::DocumentCollection;
use crate::error::DbError;
use crate::memory::MemoryCollection;
use crate::postgres::{PostgresConfig, PostgresPool};

/// Hands out [`DocumentCollection`]s by name.
///
/// The memory variant returns the same shared collection for repeated calls
/// with one name, so stores built from one provider see each other's writes.
#[derive(Clone)]
pub enum CollectionProvider {
    /// In-process collections.
    Memory(Arc<Mutex<HashMap<String, Arc<MemoryCollection>>>>),
    /// One `PostgreSQL` table per collection.
    Postgres(PostgresPool),
}

impl CollectionProvider {
    /// A provider of in-memory collections.
    pub fn memory() -> Self {
        Self::Memory(Arc::new(Mutex::new(HashMap::new())))
    }

    /// Connect a `PostgreSQL`-backed provider.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the pool cannot connect.
    pub async fn postgres(config: &PostgresConfig) -> Result<Self, DbError> {
        Ok(Self::Postgres(PostgresPool::connect(config).await?))
    }

    /// Open (creating if needed) the collection called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the backing table cannot be created.
    pub async fn collection(&self, name: &str) -> Result<Arc<dyn DocumentCollection>, DbError> {
        match self {
            Self::Memory(collections) => {
                let collection = Arc::clone(
                    collections
                        .lock()
                        .entry(name.to_owned())
                        .or_insert_with(|| Arc::new(MemoryCollection::new(name))),
                );
                Ok(collection)
            }
            Self::Postgres(pool) => Ok(Arc::new(pool.collection(name).await?)),
        }
    }

    /// The in-memory collection called `name`, if this is a memory provider
    /// and it has been opened.
    pub fn memory_collection(&self, name: &str) -> Option<Arc<MemoryCollection>> {
        match self {
            Self::Memory(collections) => collections.lock().get(name).cloned(),
            Self::Postgres(_) => None,
        }
    }

    /// Release backend resources.
    pub async fn close(&self) {
        if let Self::Postgres(pool) = self {
            pool.close().await;
        }
    }
}

impl std::fmt::Debug for CollectionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory(collections) => f
                .debug_struct("CollectionProvider::Memory")
                .field("collections", &collections.lock().len())
                .finish(),
            Self::Postgres(_) => f.debug_struct("CollectionProvider::Postgres").finish(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::document::{Filter, to_document};

    #[tokio::test]
    async fn memory_provider_shares_collections_by_name() {
        let provider = CollectionProvider::memory();
        let a = provider.collection("events").await.unwrap();
        let b = provider.collection("events").await.unwrap();
        a.insert_one(to_document(&json!({"id": "x"})).unwrap())
            .await
            .unwrap();
        assert_eq!(b.count(&Filter::All).await.unwrap(), 1);
        assert_eq!(provider.memory_collection("events").unwrap().len(), 1);
        assert!(provider.memory_collection("states").is_none());
    }
}
