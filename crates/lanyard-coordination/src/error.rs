//! Error types for coordination primitives.

use lanyard_core::KeyValueStoreError;
use snafu::Snafu;

/// Errors from coordination primitives.
///
/// A contended lock is not an error (acquire returns `Ok(false)`, and
/// `with_lock` returns [`crate::LockOutcome::Busy`]); these variants
/// cover genuinely unexpected faults.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CoordinationError {
    /// Namespace code is empty after sanitization.
    #[snafu(display("invalid sequence namespace: '{namespace}'"))]
    InvalidNamespace {
        /// The namespace as supplied by the caller.
        namespace: String,
    },

    /// Maximum CAS retries exceeded.
    #[snafu(display("max retries exceeded for {operation}: {attempts} attempts"))]
    MaxRetriesExceeded {
        /// Description of the operation.
        operation: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// Data in storage is corrupted or unparseable.
    #[snafu(display("corrupted data in key '{key}': {reason}"))]
    CorruptedData {
        /// The key with corrupted data.
        key: String,
        /// Description of what went wrong.
        reason: String,
    },

    /// Underlying storage error.
    #[snafu(display("storage error: {source}"))]
    Storage {
        /// The underlying error.
        source: KeyValueStoreError,
    },

    /// JSON serialization/deserialization error.
    #[snafu(display("serialization error: {source}"))]
    Serialization {
        /// The underlying error.
        source: serde_json::Error,
    },
}

impl From<KeyValueStoreError> for CoordinationError {
    fn from(source: KeyValueStoreError) -> Self {
        CoordinationError::Storage { source }
    }
}

impl From<serde_json::Error> for CoordinationError {
    fn from(source: serde_json::Error) -> Self {
        CoordinationError::Serialization { source }
    }
}
