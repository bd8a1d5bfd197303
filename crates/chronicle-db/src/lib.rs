//! Document storage backends for Chronicle.
//!
//! Stores in the other crates talk to a [`DocumentCollection`]: a named set
//! of JSON documents with filters, atomic conditional updates, guarded batch
//! inserts, and secondary indexes. Two implementations exist:
//!
//! - [`MemoryCollection`] -- in-process, used by tests and development
//! - [`PostgresCollection`] -- one JSONB table per collection via [`sqlx`]
//!
//! [`CollectionProvider`] opens collections by name for either backend.

pub mod collection;
pub mod document;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod provider;

pub use collection::{DocumentCollection, ReplaceOutcome};
pub use document::{
    Document, FindOptions, Filter, ID_FIELD, IndexSpec, SortOrder, Update, UpdateOp,
    VersionGuard, document_id, from_document, get_path, to_document,
};
pub use error::DbError;
pub use memory::MemoryCollection;
pub use postgres::{PostgresCollection, PostgresConfig, PostgresPool};
pub use provider::CollectionProvider;
