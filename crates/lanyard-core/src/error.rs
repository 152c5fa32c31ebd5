//! Storage error taxonomy.

use snafu::Snafu;

/// Errors surfaced by [`crate::KeyValueStore`] implementations.
///
/// Conditional-write rejections (`KeyAlreadyExists`,
/// `CompareAndSwapFailed`) are part of the normal coordination protocol:
/// callers match on them to detect a lost race. `Unreachable` models an
/// outage of the shared store and is the only variant the lock's
/// fail-open branch reacts to.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum KeyValueStoreError {
    /// Key is empty.
    #[snafu(display("key must not be empty"))]
    EmptyKey,

    /// Key exceeds the fixed size limit.
    #[snafu(display("key too large: {size} bytes (max: {max})"))]
    KeyTooLarge {
        /// Actual key size in bytes.
        size: u32,
        /// Maximum allowed size.
        max: u32,
    },

    /// Value exceeds the fixed size limit.
    #[snafu(display("value too large: {size} bytes (max: {max})"))]
    ValueTooLarge {
        /// Actual value size in bytes.
        size: u32,
        /// Maximum allowed size.
        max: u32,
    },

    /// Set-if-absent found a live entry under the key.
    #[snafu(display("key already exists: {key}"))]
    KeyAlreadyExists {
        /// The contested key.
        key: String,
    },

    /// Compare-and-swap found a value other than the expected one.
    #[snafu(display("compare-and-swap failed for key: {key}"))]
    CompareAndSwapFailed {
        /// The contested key.
        key: String,
        /// Value the caller expected (None = expected absent).
        expected: Option<String>,
        /// Value actually present (None = absent).
        actual: Option<String>,
    },

    /// The store cannot be reached.
    #[snafu(display("key-value store unreachable: {reason}"))]
    Unreachable {
        /// Human-readable description of the outage.
        reason: String,
    },
}
