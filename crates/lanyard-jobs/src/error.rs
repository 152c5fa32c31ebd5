//! Error types for the job queue.

use lanyard_core::KeyValueStoreError;
use snafu::Snafu;

/// Errors from job queue operations and handlers.
///
/// A pruned job is not an error - `status` reports
/// [`crate::ReportedState::NotFound`] instead. `JobNotFound` is reserved
/// for admin operations that target a specific job and find nothing.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum JobError {
    /// Job not found.
    #[snafu(display("job not found: {id}"))]
    JobNotFound {
        /// Job ID that was not found.
        id: String,
    },

    /// Job is in an invalid state for the operation.
    #[snafu(display("invalid job state {state} for operation: {operation}"))]
    InvalidJobState {
        /// Current job state.
        state: String,
        /// Operation that was attempted.
        operation: String,
    },

    /// Handler reported a failure; the queue schedules a retry.
    #[snafu(display("job handler failed: {reason}"))]
    HandlerFailed {
        /// Failure reason recorded on the job.
        reason: String,
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

impl From<KeyValueStoreError> for JobError {
    fn from(source: KeyValueStoreError) -> Self {
        JobError::Storage { source }
    }
}

impl From<serde_json::Error> for JobError {
    fn from(source: serde_json::Error) -> Self {
        JobError::Serialization { source }
    }
}
