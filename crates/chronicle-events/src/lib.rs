//! Event persistence for Chronicle.
//!
//! One [`EventStore`] capability, three strategies chosen by configuration:
//!
//! - [`StreamEventStore`] -- one growing document per aggregate, appended
//!   with a compare-and-swap on its version counter and split into
//!   continuation documents when it grows past a threshold
//! - [`DocumentEventStore`] -- one row per event, unique on
//!   `(aggregateId, version)`, queryable across aggregates
//! - [`HybridEventStore`] -- a hot stream store in front of a cold archive,
//!   with an [`Archiver`] moving aged events between them
//!
//! [`PayloadRegistry`] maps event type tags to caller-defined payload types.

pub mod document;
pub mod hybrid;
pub mod registry;
pub mod store;
pub mod stream;

pub use document::{DocumentConfig, DocumentEventStore, EventQuery};
pub use hybrid::{ArchiveConfig, ArchiveReport, Archiver, HybridEventStore};
pub use registry::{PayloadRegistry, PayloadRegistryBuilder};
pub use store::EventStore;
pub use stream::{StreamConfig, StreamEventStore};
