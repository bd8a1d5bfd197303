//! Store construction from configuration.
//!
//! [`StateStoreBuilder`] carries the environment presets for the state
//! store. [`build_event_store`] picks the event store strategy, and
//! [`ChronicleStores::open`] wires the backend, the event store, and the
//! state store (plus their background tasks) from one [`ChronicleConfig`].

use std::sync::Arc;
use std::time::Duration;

use chronicle_db::{CollectionProvider, DocumentCollection};
use chronicle_events::{
    Archiver, DocumentEventStore, EventStore, HybridEventStore, StreamEventStore,
};
use chronicle_state::{
    CompressionConfig, DocumentStateStore, KeyProvider, RetentionConfig, RetentionSweeper,
    StateStore, StateStoreConfig,
};
use chronicle_types::{StorageStrategy, StoreError, StoreResult};

use crate::config::{Backend, ChronicleConfig, ConfigError, DatabaseConfig, EventsConfig};

/// Versions kept by the production preset.
pub const PRODUCTION_KEEP_LAST: usize = 10;

/// Gzip level used by the production preset.
pub const PRODUCTION_GZIP_LEVEL: u32 = 6;

/// Payloads below this size skip compression in the high-throughput preset.
pub const HIGH_THROUGHPUT_MIN_SIZE: usize = 4096;

/// Builder for [`DocumentStateStore`] with environment presets.
#[derive(Debug, Clone, Default)]
pub struct StateStoreBuilder {
    config: StateStoreConfig,
}

impl StateStoreBuilder {
    /// Start from explicit settings.
    pub const fn from_config(config: StateStoreConfig) -> Self {
        Self { config }
    }

    /// No compression, no encryption, no retention.
    pub fn development() -> Self {
        Self::default()
    }

    /// Gzip, AES-GCM under `key`, and the newest ten versions kept.
    pub fn production(key: Arc<dyn KeyProvider>) -> Self {
        Self::from_config(StateStoreConfig {
            compression: Some(CompressionConfig::gzip(PRODUCTION_GZIP_LEVEL)),
            key_provider: Some(key),
            retention: RetentionConfig::KeepLast {
                count: PRODUCTION_KEEP_LAST,
            },
            track_access: true,
            ..StateStoreConfig::default()
        })
    }

    /// LZ4 on large payloads only, with metrics off and bigger scan pages.
    pub fn high_throughput() -> Self {
        Self::from_config(StateStoreConfig {
            compression: Some(CompressionConfig::lz4().with_min_size(HIGH_THROUGHPUT_MIN_SIZE)),
            batch_size: 500,
            collect_metrics: false,
            ..StateStoreConfig::default()
        })
    }

    /// Replace the compression settings.
    #[must_use]
    pub fn with_compression(mut self, compression: Option<CompressionConfig>) -> Self {
        self.config.compression = compression;
        self
    }

    /// Replace the encryption key source.
    #[must_use]
    pub fn with_key_provider(mut self, key_provider: Option<Arc<dyn KeyProvider>>) -> Self {
        self.config.key_provider = key_provider;
        self
    }

    /// Replace the retention policy.
    #[must_use]
    pub fn with_retention(mut self, retention: RetentionConfig) -> Self {
        self.config.retention = retention;
        self
    }

    /// Expire rows `ttl` after they are saved.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.config.ttl = ttl;
        self
    }

    /// The settings built so far.
    pub const fn config(&self) -> &StateStoreConfig {
        &self.config
    }

    /// Open the store on `collection`.
    ///
    /// # Errors
    ///
    /// Returns [`chronicle_types::StoreError::Validation`] for invalid
    /// settings, or a backend error if the indexes cannot be created.
    pub async fn build(self, collection: Arc<dyn DocumentCollection>) -> StoreResult<DocumentStateStore> {
        DocumentStateStore::new(collection, self.config).await
    }
}

/// Open the configured backend.
///
/// # Errors
///
/// Returns [`chronicle_types::StoreError::StoreUnavailable`] when the
/// `PostgreSQL` pool cannot connect.
pub async fn open_provider(config: &DatabaseConfig) -> StoreResult<CollectionProvider> {
    match config.backend {
        Backend::Memory => Ok(CollectionProvider::memory()),
        Backend::Postgres => {
            let provider = CollectionProvider::postgres(&config.postgres_config()).await?;
            tracing::info!(max_connections = config.max_connections, "Connected to PostgreSQL");
            Ok(provider)
        }
    }
}

/// Build the event store for the configured strategy.
///
/// The hybrid archiver is started when `start_archiver` is set and stops
/// when the store is closed.
///
/// # Errors
///
/// Returns a backend error if a collection or its indexes cannot be
/// created.
pub async fn build_event_store(
    config: &EventsConfig,
    provider: &CollectionProvider,
) -> StoreResult<Arc<dyn EventStore>> {
    let (store, _) = event_store_with_archiver(config, provider).await?;
    Ok(store)
}

async fn event_store_with_archiver(
    config: &EventsConfig,
    provider: &CollectionProvider,
) -> StoreResult<(Arc<dyn EventStore>, Option<Archiver>)> {
    let built: (Arc<dyn EventStore>, Option<Archiver>) = match config.strategy {
        StorageStrategy::Stream => {
            let collection = provider.collection(&config.collection).await?;
            let store: Arc<dyn EventStore> =
                Arc::new(StreamEventStore::new(collection, config.stream_config()).await?);
            (store, None)
        }
        StorageStrategy::Document => {
            let collection = provider.collection(&config.collection).await?;
            let store: Arc<dyn EventStore> =
                Arc::new(DocumentEventStore::new(collection, config.document_config()).await?);
            (store, None)
        }
        StorageStrategy::Hybrid => {
            let hot_collection = provider.collection(&config.hot_collection).await?;
            let cold_collection = provider.collection(&config.cold_collection).await?;
            let hot = StreamEventStore::new(hot_collection, config.stream_config()).await?;
            let cold = DocumentEventStore::new(cold_collection, config.document_config()).await?;
            let hybrid = HybridEventStore::new(hot, Arc::new(cold), config.archive_config());
            let archiver = hybrid.archiver().clone();
            if config.start_archiver {
                archiver.start();
            }
            let store: Arc<dyn EventStore> = Arc::new(hybrid);
            (store, Some(archiver))
        }
    };
    tracing::info!(strategy = %config.strategy, "Event store ready");
    Ok(built)
}

/// Everything a service needs, opened from one configuration.
pub struct ChronicleStores {
    provider: CollectionProvider,
    events: Arc<dyn EventStore>,
    archiver: Option<Archiver>,
    states: DocumentStateStore,
    sweeper: Option<RetentionSweeper>,
}

impl ChronicleStores {
    /// Validate `config`, connect the backend, and open both stores.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a bad configuration or one the
    /// stores reject while opening.
    pub async fn open(config: &ChronicleConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let provider = open_provider(&config.database).await?;
        let (events, archiver) = event_store_with_archiver(&config.events, &provider).await?;

        let states_collection = provider
            .collection(&config.state.collection)
            .await
            .map_err(StoreError::from)?;
        let states = StateStoreBuilder::from_config(config.state.store_config()?)
            .build(states_collection)
            .await?;

        let wants_sweeper = config.state.run_sweeper
            && config.state.sweep_on_save
            && config.state.retention != RetentionConfig::None;
        let sweeper = wants_sweeper.then(|| {
            let sweeper = RetentionSweeper::new(states.clone());
            sweeper.start();
            sweeper
        });

        tracing::info!(
            backend = ?config.database.backend,
            strategy = %config.events.strategy,
            states = %config.state.collection,
            sweeper = sweeper.is_some(),
            "Chronicle stores opened"
        );
        Ok(Self {
            provider,
            events,
            archiver,
            states,
            sweeper,
        })
    }

    /// The collection provider both stores were opened from.
    pub const fn provider(&self) -> &CollectionProvider {
        &self.provider
    }

    /// The event store.
    pub fn events(&self) -> &Arc<dyn EventStore> {
        &self.events
    }

    /// The hybrid archiver, when the hybrid strategy is configured.
    pub const fn archiver(&self) -> Option<&Archiver> {
        self.archiver.as_ref()
    }

    /// The state store.
    pub const fn states(&self) -> &DocumentStateStore {
        &self.states
    }

    /// The retention sweeper, when one was started.
    pub const fn sweeper(&self) -> Option<&RetentionSweeper> {
        self.sweeper.as_ref()
    }

    /// Stop background tasks, close both stores, and release the backend.
    ///
    /// # Errors
    ///
    /// Returns the first store error. The backend is released regardless.
    pub async fn close(self) -> StoreResult<()> {
        if let Some(sweeper) = &self.sweeper {
            sweeper.stop().await;
        }
        let events = self.events.close().await;
        let states = self.states.close().await;
        self.provider.close().await;
        events.and(states)
    }
}

impl std::fmt::Debug for ChronicleStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChronicleStores")
            .field("provider", &self.provider)
            .field("strategy", &self.events.strategy())
            .field("states", &self.states)
            .field("sweeper", &self.sweeper.is_some())
            .finish_non_exhaustive()
    }
}
