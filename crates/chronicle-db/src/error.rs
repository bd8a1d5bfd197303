//! Error types for the document backends.
//!
//! All backend failures are propagated via [`DbError`], which wraps the
//! underlying [`sqlx`] and [`serde_json`] errors and adds the two outcomes
//! the stores rely on for optimistic concurrency: [`DbError::DuplicateKey`]
//! and [`DbError::GuardFailed`].

use chronicle_types::StoreError;

/// Errors that can occur in the document layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A document could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An insert or replace collided with an existing id or unique index.
    #[error("duplicate key in {collection}: {key}")]
    DuplicateKey {
        /// Collection the write targeted.
        collection: String,
        /// Id or index key that collided.
        key: String,
    },

    /// A guarded insert found a different maximum than expected.
    #[error("guard failed: expected {expected}, found {actual}")]
    GuardFailed {
        /// Maximum the caller expected.
        expected: i64,
        /// Maximum actually stored.
        actual: i64,
    },

    /// The backend is not reachable.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The operation did not finish within its deadline.
    #[error("operation {operation} timed out")]
    Timeout {
        /// Operation that timed out.
        operation: String,
    },

    /// A document is malformed (missing id, wrong field type, ...).
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DbError {
    /// Whether this error is a duplicate key collision.
    pub const fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Postgres(e) => Self::unavailable("postgres", e),
            DbError::Serialization(e) => Self::Serialization(e),
            DbError::DuplicateKey { key, .. } => Self::conflict(key, 0, 0),
            DbError::GuardFailed { expected, actual } => Self::ConcurrencyConflict {
                aggregate_id: String::new(),
                expected: u64::try_from(expected).unwrap_or(0),
                actual: u64::try_from(actual).unwrap_or(0),
            },
            DbError::Unavailable(reason) => Self::unavailable("backend", reason),
            DbError::Timeout { operation } => Self::Cancelled { operation },
            DbError::InvalidDocument(reason) => Self::validation("document", reason),
            DbError::Config(reason) => Self::Config(reason),
        }
    }
}
