//! Configuration loading and typed config structures for Chronicle.
//!
//! The configuration lives in a YAML file (`chronicle.yaml` by convention).
//! Every field has a default, so an empty file is a valid in-memory setup.
//! Environment variables override selected values after parsing:
//!
//! - `DATABASE_URL` overrides `database.url`
//! - `CHRONICLE_ENCRYPTION_KEY` overrides `state.encryption.key` (base64)
//! - `CHRONICLE_LOG_LEVEL` overrides `logging.level`

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chronicle_db::PostgresConfig;
use chronicle_events::{ArchiveConfig, DocumentConfig, StreamConfig};
use chronicle_migrate::{MigrationConfig, SchemaMigrationConfig};
use chronicle_state::{
    CompressionConfig, ENCRYPTION_KEY_ENV_VAR, KeyProvider, RetentionConfig, StateStoreConfig,
    StaticKeyProvider,
};
use chronicle_types::{StorageStrategy, StoreError};
use serde::Deserialize;

/// Overrides `database.url`.
pub const DATABASE_URL_ENV_VAR: &str = "DATABASE_URL";

/// Overrides `logging.level`.
pub const LOG_LEVEL_ENV_VAR: &str = "CHRONICLE_LOG_LEVEL";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value is out of range.
    #[error("invalid config value {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The tracing subscriber could not be installed.
    #[error("failed to initialise logging: {0}")]
    Logging(String),
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

impl From<StoreError> for ConfigError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation { field, reason } => Self::Invalid { field, reason },
            other => Self::Invalid {
                field: "config".to_owned(),
                reason: other.to_string(),
            },
        }
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_owned(),
        reason: reason.into(),
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChronicleConfig {
    /// Backing store selection and pool sizing.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Event store strategy and layout.
    #[serde(default)]
    pub events: EventsConfig,

    /// State store pipeline and retention.
    #[serde(default)]
    pub state: StateConfig,

    /// Store-to-store and schema migration settings.
    #[serde(default)]
    pub migration: MigrationSettings,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ChronicleConfig {
    /// Load configuration from a YAML file, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config = Self::parse_raw(yaml)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Parse configuration without looking at the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse_raw(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Apply overrides read through `lookup` (normally the process
    /// environment).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(DATABASE_URL_ENV_VAR) {
            self.database.url = url;
        }
        if let Some(key) = lookup(ENCRYPTION_KEY_ENV_VAR) {
            self.state.encryption.key = Some(key);
        }
        if let Some(level) = lookup(LOG_LEVEL_ENV_VAR) {
            self.logging.level = level;
        }
    }

    /// Reject out-of-range values before any store is opened.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.events.validate()?;
        self.state.store_config()?.validate()?;
        self.migration.migration_config().validate()?;
        if self.migration.schema_batch_size == 0 {
            return Err(invalid("migration.schema_batch_size", "must be at least 1"));
        }
        Ok(())
    }
}

/// Which backend holds the collections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process collections; nothing survives a restart.
    #[default]
    Memory,
    /// `PostgreSQL` JSONB tables.
    Postgres,
}

/// Backing store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    /// Backend kind.
    #[serde(default)]
    pub backend: Backend,

    /// `PostgreSQL` connection URL.
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Seconds to wait for a connection.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Seconds an idle connection is kept.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Deadline for every collection operation, in seconds.
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
}

impl DatabaseConfig {
    /// Pool settings for the `PostgreSQL` backend.
    pub fn postgres_config(&self) -> PostgresConfig {
        PostgresConfig::new(&self.url)
            .with_max_connections(self.max_connections)
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .with_idle_timeout(Duration::from_secs(self.idle_timeout_secs))
            .with_operation_timeout(Duration::from_secs(self.operation_timeout_secs))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == Backend::Postgres && self.url.trim().is_empty() {
            return Err(invalid("database.url", "required for the postgres backend"));
        }
        if self.max_connections == 0 {
            return Err(invalid("database.max_connections", "must be at least 1"));
        }
        if self.operation_timeout_secs == 0 {
            return Err(invalid("database.operation_timeout_secs", "must be at least 1"));
        }
        Ok(())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            url: default_database_url(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
        }
    }
}

/// Event store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EventsConfig {
    /// Physical layout.
    #[serde(default)]
    pub strategy: StorageStrategy,

    /// Collection for the stream and document strategies.
    #[serde(default = "default_events_collection")]
    pub collection: String,

    /// Stream type recorded for events that carry none.
    #[serde(default = "default_stream_type")]
    pub stream_type: String,

    /// Head size that triggers a stream split.
    #[serde(default = "default_split_threshold")]
    pub split_threshold: usize,

    /// Newest events left in the head after a split.
    #[serde(default = "default_retain_after_split")]
    pub retain_after_split: usize,

    /// Whether to create secondary indexes.
    #[serde(default = "default_true")]
    pub create_indexes: bool,

    /// Hot collection of the hybrid strategy.
    #[serde(default = "default_hot_collection")]
    pub hot_collection: String,

    /// Cold collection of the hybrid strategy.
    #[serde(default = "default_cold_collection")]
    pub cold_collection: String,

    /// Seconds between archive passes.
    #[serde(default = "default_archive_interval_secs")]
    pub archive_interval_secs: u64,

    /// Age in seconds after which hot events are archived.
    #[serde(default = "default_archive_age_secs")]
    pub archive_age_secs: u64,

    /// Streams examined per archive pass.
    #[serde(default = "default_archive_batch_size")]
    pub archive_batch_size: usize,

    /// Start the archiver when the store is built.
    #[serde(default = "default_true")]
    pub start_archiver: bool,
}

impl EventsConfig {
    /// Settings for a stream store.
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            stream_type: self.stream_type.clone(),
            split_threshold: self.split_threshold,
            retain_after_split: self.retain_after_split,
            create_indexes: self.create_indexes,
        }
    }

    /// Settings for a document store.
    pub fn document_config(&self) -> DocumentConfig {
        DocumentConfig {
            stream_type: self.stream_type.clone(),
            create_indexes: self.create_indexes,
        }
    }

    /// Settings for the hybrid archiver.
    pub fn archive_config(&self) -> ArchiveConfig {
        ArchiveConfig {
            interval: Duration::from_secs(self.archive_interval_secs),
            age_threshold: Duration::from_secs(self.archive_age_secs),
            batch_size: self.archive_batch_size,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.split_threshold == 0 {
            return Err(invalid("events.split_threshold", "must be at least 1"));
        }
        if self.retain_after_split >= self.split_threshold {
            return Err(invalid(
                "events.retain_after_split",
                "must be smaller than split_threshold",
            ));
        }
        if self.strategy == StorageStrategy::Hybrid {
            if self.hot_collection == self.cold_collection {
                return Err(invalid(
                    "events.cold_collection",
                    "must differ from hot_collection",
                ));
            }
            if self.archive_interval_secs == 0 {
                return Err(invalid("events.archive_interval_secs", "must be at least 1"));
            }
            if self.archive_batch_size == 0 {
                return Err(invalid("events.archive_batch_size", "must be at least 1"));
            }
        }
        Ok(())
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            strategy: StorageStrategy::default(),
            collection: default_events_collection(),
            stream_type: default_stream_type(),
            split_threshold: default_split_threshold(),
            retain_after_split: default_retain_after_split(),
            create_indexes: true,
            hot_collection: default_hot_collection(),
            cold_collection: default_cold_collection(),
            archive_interval_secs: default_archive_interval_secs(),
            archive_age_secs: default_archive_age_secs(),
            archive_batch_size: default_archive_batch_size(),
            start_archiver: true,
        }
    }
}

/// Encryption settings for the state store.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct EncryptionSettings {
    /// Encrypt snapshot payloads.
    #[serde(default)]
    pub enabled: bool,

    /// Base64 AES key (16 or 32 bytes once decoded).
    #[serde(default)]
    pub key: Option<String>,

    /// Key id recorded with each ciphertext.
    #[serde(default = "default_key_id")]
    pub key_id: String,
}

impl EncryptionSettings {
    /// Build the key provider, when encryption is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the key is missing or malformed.
    pub fn key_provider(&self) -> Result<Option<Arc<dyn KeyProvider>>, ConfigError> {
        if !self.enabled {
            return Ok(None);
        }
        let Some(encoded) = self.key.as_deref() else {
            return Err(invalid(
                "state.encryption.key",
                format!("required when encryption is enabled (or set {ENCRYPTION_KEY_ENV_VAR})"),
            ));
        };
        let provider = StaticKeyProvider::from_base64(encoded)?.with_key_id(self.key_id.clone());
        Ok(Some(Arc::new(provider)))
    }
}

impl Default for EncryptionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            key: None,
            key_id: default_key_id(),
        }
    }
}

impl fmt::Debug for EncryptionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionSettings")
            .field("enabled", &self.enabled)
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("key_id", &self.key_id)
            .finish()
    }
}

/// State store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StateConfig {
    /// Collection holding snapshot rows.
    #[serde(default = "default_states_collection")]
    pub collection: String,

    /// Compression; absent means payloads are stored as-is.
    #[serde(default)]
    pub compression: Option<CompressionConfig>,

    /// Encryption.
    #[serde(default)]
    pub encryption: EncryptionSettings,

    /// Retention policy.
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Rows per page when scanning.
    #[serde(default = "default_state_batch_size")]
    pub batch_size: usize,

    /// Whether to create secondary indexes.
    #[serde(default = "default_true")]
    pub create_indexes: bool,

    /// Whether to keep operation counters.
    #[serde(default = "default_true")]
    pub collect_metrics: bool,

    /// Seconds after which a saved row expires.
    #[serde(default)]
    pub ttl_secs: Option<u64>,

    /// Record `lastAccessedAt` on every load.
    #[serde(default)]
    pub track_access: bool,

    /// Queue a retention sweep after every save.
    #[serde(default = "default_true")]
    pub sweep_on_save: bool,

    /// Run a background sweeper instead of one-off sweep tasks.
    #[serde(default = "default_true")]
    pub run_sweeper: bool,
}

impl StateConfig {
    /// Settings for a [`chronicle_state::DocumentStateStore`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when encryption is enabled without a
    /// usable key.
    pub fn store_config(&self) -> Result<StateStoreConfig, ConfigError> {
        Ok(StateStoreConfig {
            compression: self.compression.clone(),
            key_provider: self.encryption.key_provider()?,
            retention: self.retention.clone(),
            batch_size: self.batch_size,
            create_indexes: self.create_indexes,
            collect_metrics: self.collect_metrics,
            ttl: self.ttl_secs.map(Duration::from_secs),
            track_access: self.track_access,
            sweep_on_save: self.sweep_on_save,
        })
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            collection: default_states_collection(),
            compression: None,
            encryption: EncryptionSettings::default(),
            retention: RetentionConfig::default(),
            batch_size: default_state_batch_size(),
            create_indexes: true,
            collect_metrics: true,
            ttl_secs: None,
            track_access: false,
            sweep_on_save: true,
            run_sweeper: true,
        }
    }
}

/// Migration tooling configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MigrationSettings {
    /// Streams copied concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Events per target write.
    #[serde(default = "default_migration_batch_size")]
    pub batch_size: usize,

    /// Verify each copied stream.
    #[serde(default = "default_true")]
    pub verify: bool,

    /// Keep going after a failed stream.
    #[serde(default)]
    pub continue_on_error: bool,

    /// Documents per schema migration batch.
    #[serde(default = "default_schema_batch_size")]
    pub schema_batch_size: usize,
}

impl MigrationSettings {
    /// Settings for [`chronicle_migrate::EventStoreMigrator`].
    pub const fn migration_config(&self) -> MigrationConfig {
        MigrationConfig {
            concurrency: self.concurrency,
            batch_size: self.batch_size,
            verify: self.verify,
            continue_on_error: self.continue_on_error,
        }
    }

    /// Settings for [`chronicle_migrate::SchemaMigrator`].
    pub const fn schema_config(&self, dry_run: bool) -> SchemaMigrationConfig {
        SchemaMigrationConfig {
            batch_size: self.schema_batch_size,
            dry_run,
        }
    }
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            batch_size: default_migration_batch_size(),
            verify: true,
            continue_on_error: false,
            schema_batch_size: default_schema_batch_size(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_database_url() -> String {
    "postgresql://localhost:5432/chronicle".to_owned()
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

const fn default_idle_timeout_secs() -> u64 {
    300
}

const fn default_operation_timeout_secs() -> u64 {
    30
}

fn default_events_collection() -> String {
    "events".to_owned()
}

fn default_stream_type() -> String {
    "aggregate".to_owned()
}

const fn default_split_threshold() -> usize {
    chronicle_events::stream::DEFAULT_SPLIT_THRESHOLD
}

const fn default_retain_after_split() -> usize {
    chronicle_events::stream::DEFAULT_RETAIN_AFTER_SPLIT
}

fn default_hot_collection() -> String {
    "events_hot".to_owned()
}

fn default_cold_collection() -> String {
    "events_cold".to_owned()
}

const fn default_archive_interval_secs() -> u64 {
    chronicle_events::hybrid::DEFAULT_ARCHIVE_INTERVAL.as_secs()
}

const fn default_archive_age_secs() -> u64 {
    chronicle_events::hybrid::DEFAULT_ARCHIVE_AGE.as_secs()
}

const fn default_archive_batch_size() -> usize {
    chronicle_events::hybrid::DEFAULT_ARCHIVE_BATCH
}

fn default_states_collection() -> String {
    "states".to_owned()
}

fn default_key_id() -> String {
    "default".to_owned()
}

const fn default_state_batch_size() -> usize {
    100
}

const fn default_concurrency() -> usize {
    chronicle_migrate::migrator::DEFAULT_CONCURRENCY
}

const fn default_migration_batch_size() -> usize {
    chronicle_migrate::migrator::DEFAULT_MIGRATION_BATCH_SIZE
}

const fn default_schema_batch_size() -> usize {
    chronicle_migrate::schema::DEFAULT_SCHEMA_BATCH_SIZE
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const KEY_32: &str = "QkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkI=";

    #[test]
    fn empty_yaml_yields_defaults() {
        let config = ChronicleConfig::parse_raw("").unwrap();
        assert_eq!(config, ChronicleConfig::default());
        assert_eq!(config.database.backend, Backend::Memory);
        assert_eq!(config.events.strategy, StorageStrategy::Stream);
        assert_eq!(config.events.split_threshold, 1000);
        assert_eq!(config.state.collection, "states");
        assert!(config.state.compression.is_none());
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_every_section() {
        let yaml = r"
database:
  backend: postgres
  url: postgresql://db:5432/chronicle
  max_connections: 4
events:
  strategy: hybrid
  hot_collection: hot
  cold_collection: cold
  archive_age_secs: 60
state:
  compression:
    algorithm: lz4
    level: 3
    min_size: 256
  retention:
    policy: any
    policies:
      - policy: keep_last
        count: 5
      - policy: time_based
        max_age_secs: 3600
  ttl_secs: 86400
migration:
  concurrency: 8
  continue_on_error: true
logging:
  level: debug
  format: json
";
        let config = ChronicleConfig::parse_raw(yaml).unwrap();
        assert_eq!(config.database.backend, Backend::Postgres);
        assert_eq!(config.database.postgres_config().max_connections, 4);
        assert_eq!(config.events.strategy, StorageStrategy::Hybrid);
        assert_eq!(config.events.archive_config().age_threshold, Duration::from_secs(60));
        let compression = config.state.compression.clone().unwrap();
        assert_eq!(compression.level, 3);
        assert_eq!(compression.min_size, 256);
        assert!(compression.skip_precompressed);
        assert!(matches!(config.state.retention, RetentionConfig::Any { ref policies } if policies.len() == 2));
        assert_eq!(config.state.store_config().unwrap().ttl, Some(Duration::from_secs(86_400)));
        assert_eq!(config.migration.migration_config().concurrency, 8);
        assert!(config.migration.continue_on_error);
        let schema = config.migration.schema_config(true);
        assert_eq!(schema.batch_size, 100);
        assert!(schema.dry_run);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = ChronicleConfig::parse_raw("logging:\n  level: warn\n").unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            (DATABASE_URL_ENV_VAR, "postgresql://override/db"),
            (ENCRYPTION_KEY_ENV_VAR, KEY_32),
            (LOG_LEVEL_ENV_VAR, "trace"),
        ]);
        config.apply_overrides(|name| env.get(name).map(|v| (*v).to_owned()));
        assert_eq!(config.database.url, "postgresql://override/db");
        assert_eq!(config.state.encryption.key.as_deref(), Some(KEY_32));
        assert_eq!(config.logging.level, "trace");
    }

    #[test]
    fn encryption_needs_a_valid_key() {
        let mut config = ChronicleConfig::parse_raw("state:\n  encryption:\n    enabled: true\n").unwrap();
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::Invalid { ref field, .. } if field == "state.encryption.key"
        ));

        config.state.encryption.key = Some("c2hvcnQ=".to_owned());
        assert!(config.validate().is_err());

        config.state.encryption.key = Some(KEY_32.to_owned());
        assert!(config.validate().is_ok());
        let provider = config.state.encryption.key_provider().unwrap().unwrap();
        assert_eq!(provider.key_id(), "default");
        assert!(!format!("{:?}", config.state.encryption).contains(KEY_32));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let cases = [
            "state:\n  compression:\n    algorithm: gzip\n    level: 10\n",
            "state:\n  batch_size: 0\n",
            "events:\n  split_threshold: 0\n",
            "events:\n  split_threshold: 10\n  retain_after_split: 10\n",
            "events:\n  strategy: hybrid\n  hot_collection: x\n  cold_collection: x\n",
            "migration:\n  concurrency: 0\n",
            "state:\n  retention:\n    policy: keep_last\n    count: 0\n",
        ];
        for yaml in cases {
            let config = ChronicleConfig::parse_raw(yaml).unwrap();
            assert!(config.validate().is_err(), "accepted: {yaml}");
        }
    }

    #[test]
    fn malformed_yaml_is_a_yaml_error() {
        let err = ChronicleConfig::parse_raw("events: [unterminated").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml { .. }));
    }
}
