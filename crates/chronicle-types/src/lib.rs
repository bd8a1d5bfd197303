//! Shared type definitions for the Chronicle persistence layer.
//!
//! This crate is the single source of truth for the data model used across
//! the Chronicle workspace: events, aggregate state snapshots, the storage
//! strategy selector, the transform descriptors persisted alongside state
//! payloads, and the error taxonomy every store returns.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for aggregates and events
//! - [`event`] -- The immutable [`Event`] record
//! - [`state`] -- [`AggregateState`] snapshots and their [`StateSummary`]
//! - [`strategy`] -- The [`StorageStrategy`] selector
//! - [`transform`] -- [`CompressionInfo`] and [`EncryptionInfo`] descriptors
//! - [`error`] -- The [`StoreError`] taxonomy
//! - [`timefmt`] -- Fixed-width timestamp encoding for sortable documents
//! - [`encoding`] -- Base64 serde helpers for opaque byte payloads

pub mod encoding;
pub mod error;
pub mod event;
pub mod ids;
pub mod state;
pub mod strategy;
pub mod timefmt;
pub mod transform;

// Re-export all public types at crate root for convenience.
pub use error::{ErrorKind, StoreError, StoreResult};
pub use event::{Event, INITIAL_SCHEMA_VERSION, Metadata, validate_batch};
pub use ids::{AggregateId, EventId};
pub use state::{AggregateState, StateSummary};
pub use strategy::StorageStrategy;
pub use transform::{CompressionInfo, EncryptionInfo, TRANSFORM_NONE};
