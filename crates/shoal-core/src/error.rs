//! Error types for Shoal

use thiserror::Error;

/// Result type alias for Shoal operations
pub type Result<T> = std::result::Result<T, ShoalError>;

/// Main error type for Shoal
///
/// Every public operation returns one of these variants. Validation and
/// authorization failures are returned before any durable state changes;
/// `Embedding` is returned only after the ingestion rollback has completed.
#[derive(Error, Debug)]
pub enum ShoalError {
    /// A referenced collection, document, chunk, or vector does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// An entity with the same identifier already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The caller lacks the admin or genesis role required by the operation
    #[error("caller is not authorized for this operation")]
    NotAuthorized,

    /// Request validation failed
    #[error("invalid {field}: {reason}")]
    InvalidInput {
        /// Field or parameter that failed validation
        field: String,
        /// Human-readable reason
        reason: String,
    },

    /// A configured resource limit was exceeded
    #[error("resource limit exceeded: {0}")]
    ResourceExhausted(String),

    /// The embedding provider failed; ingestion state has been rolled back
    #[error("embedding provider failed: {0}")]
    Embedding(#[from] ProviderError),

    /// An embedding run for the same document is already in flight
    #[error("an embedding run for this document is already in progress")]
    AlreadyInProgress,

    /// A stored value failed to decode or the durable layout is inconsistent
    #[error("corrupt durable state: {0}")]
    CorruptState(String),
}

impl ShoalError {
    /// Shorthand for an `InvalidInput` error
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ShoalError::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a `NotFound` error
    pub fn not_found(what: impl Into<String>) -> Self {
        ShoalError::NotFound(what.into())
    }
}

/// Failures surfaced by the embedding port
///
/// The core recognizes these shapes regardless of which adapter produced
/// them; everything else is folded into `Other`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider rejected the request due to rate limiting
    #[error("rate limited by embedding provider")]
    RateLimited,

    /// The provider answered, but the payload could not be interpreted
    #[error("invalid response from embedding provider: {0}")]
    InvalidResponse(String),

    /// The request never completed (connect, TLS, timeout)
    #[error("transport failure: {0}")]
    Transport(String),

    /// Any other provider-reported failure
    #[error("{0}")]
    Other(String),
}

impl From<redb::Error> for ShoalError {
    fn from(err: redb::Error) -> Self {
        ShoalError::CorruptState(err.to_string())
    }
}

impl From<redb::DatabaseError> for ShoalError {
    fn from(err: redb::DatabaseError) -> Self {
        ShoalError::CorruptState(err.to_string())
    }
}

impl From<redb::StorageError> for ShoalError {
    fn from(err: redb::StorageError) -> Self {
        ShoalError::CorruptState(err.to_string())
    }
}

impl From<redb::TableError> for ShoalError {
    fn from(err: redb::TableError) -> Self {
        ShoalError::CorruptState(err.to_string())
    }
}

impl From<redb::TransactionError> for ShoalError {
    fn from(err: redb::TransactionError) -> Self {
        ShoalError::CorruptState(err.to_string())
    }
}

impl From<redb::CommitError> for ShoalError {
    fn from(err: redb::CommitError) -> Self {
        ShoalError::CorruptState(err.to_string())
    }
}
