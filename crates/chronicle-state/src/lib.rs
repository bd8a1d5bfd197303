//! Aggregate state snapshots for Chronicle.
//!
//! [`DocumentStateStore`] persists one document per `(aggregate, version)`
//! and runs every payload through an optional compress-then-encrypt
//! pipeline. Retention policies prune history after saves, either through a
//! running [`RetentionSweeper`] or a detached one-off sweep.
//!
//! # Modules
//!
//! - [`store`] -- The [`StateStore`] trait plus query and metrics extensions
//! - [`document`] -- [`DocumentStateStore`] and its configuration
//! - [`compression`] -- Gzip and LZ4 with a precompressed-payload heuristic
//! - [`encryption`] -- AES-GCM sealing behind a [`KeyProvider`]
//! - [`codec`] -- The composed save/load byte pipeline
//! - [`retention`] -- Retention policies and their configuration
//! - [`sweeper`] -- The background [`RetentionSweeper`]
//! - [`metrics`] -- Storage metrics and operation counters

pub mod codec;
pub mod compression;
pub mod document;
pub mod encryption;
pub mod metrics;
pub mod retention;
pub mod store;
pub mod sweeper;

pub use codec::{EncodedPayload, PayloadCodec};
pub use compression::{CompressionAlgorithm, CompressionConfig, Compressor};
pub use document::{DocumentStateStore, StateStoreConfig, state_document_id};
pub use encryption::{
    ENCRYPTION_KEY_ENV_VAR, Encryptor, EnvKeyProvider, KeyProvider, StaticKeyProvider,
};
pub use metrics::{OperationStats, StatsSnapshot, StorageMetrics, TypeMetrics};
pub use retention::{
    Composite, CompositeMode, KeepLastN, RetentionConfig, RetentionPolicy, SizeBased, TimeBased,
};
pub use store::{StateMetricsStore, StateQuery, StateQueryStore, StateStore};
pub use sweeper::RetentionSweeper;
