//! Error types for token signing and rotation.

use lanyard_core::KeyValueStoreError;
use snafu::Snafu;

/// Errors from token operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AuthError {
    /// The presented token failed signature or validity checks.
    ///
    /// Deliberately coarse: callers (and attackers) learn only that the
    /// token is unusable, not which check failed. The specific reason is
    /// logged server-side.
    #[snafu(display("token is invalid or expired"))]
    InvalidOrExpired,

    /// The presented refresh token is valid but no longer a member of
    /// the user's live set: it was already rotated, revoked, or evicted.
    #[snafu(display("refresh token already used or revoked"))]
    TokenAlreadyUsed,

    /// Token serialization failed.
    #[snafu(display("token encoding error: {reason}"))]
    Encoding {
        /// What went wrong.
        reason: String,
    },

    /// Encoded token exceeds the fixed size limit.
    #[snafu(display("token too large: {size} bytes (max {max})"))]
    TokenTooLarge {
        /// Encoded size in bytes.
        size: u64,
        /// Maximum allowed size in bytes.
        max: u64,
    },

    /// Maximum CAS retries exceeded on the refresh-token set.
    #[snafu(display("max retries exceeded rotating tokens for {user_id}: {attempts} attempts"))]
    MaxRetriesExceeded {
        /// User whose set was contended.
        user_id: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// Underlying storage error.
    #[snafu(display("storage error: {source}"))]
    Storage {
        /// The underlying error.
        source: KeyValueStoreError,
    },

    /// Stored refresh-token set is corrupted or unparseable.
    #[snafu(display("corrupted refresh-token set for {user_id}: {reason}"))]
    CorruptedSet {
        /// User whose set could not be parsed.
        user_id: String,
        /// Description of what went wrong.
        reason: String,
    },
}

impl From<KeyValueStoreError> for AuthError {
    fn from(source: KeyValueStoreError) -> Self {
        AuthError::Storage { source }
    }
}
