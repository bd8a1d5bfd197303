//! Error taxonomy shared by every Chronicle store.
//!
//! Callers branch on [`StoreError::kind`]: retry a
//! [`ErrorKind::ConcurrencyConflict`] with a freshly read version, treat
//! [`ErrorKind::NotFound`] as "create new", and surface everything else.
//! Backend crates convert their own error types into [`StoreError`] while
//! preserving the kind.

/// Convenience alias for results carrying a [`StoreError`].
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by event stores, state stores, and migration tooling.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The caller's expected version did not match the stored version.
    #[error(
        "concurrency conflict on aggregate {aggregate_id}: expected version {expected}, actual {actual}"
    )]
    ConcurrencyConflict {
        /// Aggregate whose write was rejected.
        aggregate_id: String,
        /// Version the caller expected to be current.
        expected: u64,
        /// Version actually stored at the time of the write.
        actual: u64,
    },

    /// A stream, state, or snapshot does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// What was looked up (`stream`, `state`, ...).
        entity: &'static str,
        /// Identifier of the missing item.
        id: String,
    },

    /// A version number is out of sequence or otherwise unusable.
    #[error("invalid version {version} for aggregate {aggregate_id}: {reason}")]
    InvalidVersion {
        /// Aggregate the version belongs to.
        aggregate_id: String,
        /// The offending version.
        version: u64,
        /// Why it was rejected.
        reason: String,
    },

    /// An input failed validation before any I/O was performed.
    #[error("validation failed for {field}: {reason}")]
    Validation {
        /// Field that failed validation.
        field: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Compressing or decompressing a payload failed.
    #[error("compression failed: {0}")]
    CompressionFailed(String),

    /// Encrypting or decrypting a payload failed (including tag mismatch).
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// The backing store could not complete the operation.
    #[error("store unavailable during {operation}: {reason}")]
    StoreUnavailable {
        /// Operation that was in flight.
        operation: String,
        /// Underlying failure description.
        reason: String,
    },

    /// The operation's deadline expired or it was cancelled.
    #[error("operation {operation} cancelled: deadline exceeded")]
    Cancelled {
        /// Operation that was cancelled.
        operation: String,
    },

    /// A persisted document could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Store configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Copyable classification of a [`StoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`StoreError::ConcurrencyConflict`].
    ConcurrencyConflict,
    /// See [`StoreError::NotFound`].
    NotFound,
    /// See [`StoreError::InvalidVersion`].
    InvalidVersion,
    /// See [`StoreError::Validation`].
    Validation,
    /// See [`StoreError::CompressionFailed`].
    CompressionFailed,
    /// See [`StoreError::EncryptionFailed`].
    EncryptionFailed,
    /// See [`StoreError::StoreUnavailable`].
    StoreUnavailable,
    /// See [`StoreError::Cancelled`].
    Cancelled,
    /// See [`StoreError::Serialization`].
    Serialization,
    /// See [`StoreError::Config`].
    Config,
}

impl StoreError {
    /// Build a [`StoreError::Validation`].
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Build a [`StoreError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Build a [`StoreError::ConcurrencyConflict`].
    pub fn conflict(aggregate_id: impl ToString, expected: u64, actual: u64) -> Self {
        Self::ConcurrencyConflict {
            aggregate_id: aggregate_id.to_string(),
            expected,
            actual,
        }
    }

    /// Build a [`StoreError::StoreUnavailable`].
    pub fn unavailable(operation: impl Into<String>, reason: impl ToString) -> Self {
        Self::StoreUnavailable {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Classify this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ConcurrencyConflict { .. } => ErrorKind::ConcurrencyConflict,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidVersion { .. } => ErrorKind::InvalidVersion,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::CompressionFailed(_) => ErrorKind::CompressionFailed,
            Self::EncryptionFailed(_) => ErrorKind::EncryptionFailed,
            Self::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether this is a [`StoreError::ConcurrencyConflict`].
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    /// Whether this is a [`StoreError::NotFound`].
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Conflicts need a fresh version from the caller first; unavailability
    /// and cancellation are transient.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyConflict { .. } | Self::StoreUnavailable { .. } | Self::Cancelled { .. }
        )
    }

    /// Prefix the operation name onto unavailability and cancellation errors.
    ///
    /// Other kinds are returned unchanged so callers can still branch on them.
    #[must_use]
    pub fn with_operation(self, op: &str) -> Self {
        match self {
            Self::StoreUnavailable { operation, reason } => Self::StoreUnavailable {
                operation: format!("{op}: {operation}"),
                reason,
            },
            Self::Cancelled { operation } => Self::Cancelled {
                operation: format!("{op}: {operation}"),
            },
            other => other,
        }
    }
}
