//! Storage error types and result alias.
//!
//! Every backend and every directory store maps its failures onto
//! [`StorageError`]. Callers further up the stack translate these into
//! authentication or authorization outcomes.
//!
//! # Error Types
//!
//! - [`StorageError::NotFound`] - A record or key does not exist
//! - [`StorageError::AlreadyExists`] - A uniqueness index already holds the value
//! - [`StorageError::Conflict`] - Optimistic concurrency check failed at commit
//! - [`StorageError::Referenced`] - A record cannot be removed while others point at it
//! - [`StorageError::Serialization`] - Record encoding/decoding failed
//! - [`StorageError::Internal`] - Backend-specific internal errors
//!
//! # Example
//!
//! ```
//! use labgate_storage::{StorageError, StorageResult};
//!
//! fn lookup(key: &str) -> StorageResult<Vec<u8>> {
//!     Err(StorageError::not_found(key))
//! }
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// Errors preserve their source chain via the `#[source]` attribute.
///
/// # Non-exhaustive
///
/// New variants may be added without a semver-breaking change. Downstream
/// match expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The requested key or record was not found.
    #[error("Key not found: {key}")]
    NotFound {
        /// The key that was not found.
        key: String,
    },

    /// A uniqueness index already maps the given key.
    ///
    /// Returned when creating an identity whose username or email is taken,
    /// or a lab whose name is taken.
    #[error("Key already exists: {key}")]
    AlreadyExists {
        /// The index key that is already occupied.
        key: String,
    },

    /// Transaction conflict due to optimistic locking failure.
    ///
    /// A compare-and-set or compare-and-delete guard did not hold at
    /// commit time. Nothing from the transaction was applied.
    #[error("Transaction conflict")]
    Conflict,

    /// The record is still referenced by other records and cannot be removed.
    #[error("Record still referenced: {key}")]
    Referenced {
        /// The referencing key that blocked the removal.
        key: String,
    },

    /// Serialization or deserialization error.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying error that caused serialization to fail.
        #[source]
        source: Option<BoxError>,
    },

    /// Internal storage backend error.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this internal failure.
        #[source]
        source: Option<BoxError>,
    },
}

impl StorageError {
    /// Creates a new `NotFound` error for the given key.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates a new `AlreadyExists` error for the given index key.
    #[must_use]
    pub fn already_exists(key: impl Into<String>) -> Self {
        Self::AlreadyExists { key: key.into() }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict() -> Self {
        Self::Conflict
    }

    /// Creates a new `Referenced` error for the blocking key.
    #[must_use]
    pub fn referenced(key: impl Into<String>) -> Self {
        Self::Referenced { key: key.into() }
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Internal` error with a message and source error.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Returns `true` for errors that a caller may resolve by retrying.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_with_source("record encoding failed", err)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(StorageError::not_found("labs/1").to_string(), "Key not found: labs/1");
        assert_eq!(
            StorageError::already_exists("identity-index/username/alice").to_string(),
            "Key already exists: identity-index/username/alice"
        );
        assert_eq!(StorageError::conflict().to_string(), "Transaction conflict");
        assert_eq!(
            StorageError::referenced("lab-index/creator/1/2").to_string(),
            "Record still referenced: lab-index/creator/1/2"
        );
    }

    #[test]
    fn test_json_error_keeps_source() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err = StorageError::from(json_err);

        assert!(matches!(err, StorageError::Serialization { .. }));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_only_conflict_is_transient() {
        assert!(StorageError::conflict().is_transient());
        assert!(!StorageError::not_found("k").is_transient());
        assert!(!StorageError::internal("boom").is_transient());
    }
}
