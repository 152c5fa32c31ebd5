//! Key-value operation types.
//!
//! Every mutation is a single atomic command applied by the store.
//! Coordination primitives never issue a read followed by an
//! unconditional write against contended state.

use serde::Deserialize;
use serde::Serialize;

use crate::constants::MAX_KEY_SIZE;
use crate::constants::MAX_VALUE_SIZE;
use crate::error::KeyValueStoreError;

/// Commands for modifying key-value state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum WriteCommand {
    /// Set a single key-value pair.
    Set {
        /// Key to write.
        key: String,
        /// Value to store.
        value: String,
    },
    /// Set a key-value pair that expires after `ttl_ms`.
    SetWithTtl {
        /// Key to write.
        key: String,
        /// Value to store.
        value: String,
        /// Time-to-live in milliseconds.
        ttl_ms: u64,
    },
    /// Create a key with expiry only if no live entry exists.
    ///
    /// This is the lock substrate: creation and expiry are one atomic
    /// command. Fails with [`KeyValueStoreError::KeyAlreadyExists`] when
    /// a live (unexpired) entry is present.
    SetIfAbsentWithTtl {
        /// Key to create.
        key: String,
        /// Value to store.
        value: String,
        /// Time-to-live in milliseconds.
        ttl_ms: u64,
    },
    /// Atomically replace the value if the current value matches.
    ///
    /// `expected: None` asserts the key is absent, making this an atomic
    /// create. Fails with [`KeyValueStoreError::CompareAndSwapFailed`]
    /// otherwise.
    CompareAndSwap {
        /// Key to update.
        key: String,
        /// Expected current value (None = expected absent).
        expected: Option<String>,
        /// Replacement value.
        new_value: String,
    },
    /// Atomically delete the key if the current value matches.
    CompareAndDelete {
        /// Key to delete.
        key: String,
        /// Expected current value.
        expected: String,
    },
    /// Delete a single key unconditionally.
    Delete {
        /// Key to delete.
        key: String,
    },
}

/// Request to perform a write operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WriteRequest {
    /// The command to apply.
    pub command: WriteCommand,
}

impl WriteRequest {
    /// Create a Set command.
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            command: WriteCommand::Set {
                key: key.into(),
                value: value.into(),
            },
        }
    }

    /// Create a SetWithTtl command.
    pub fn set_with_ttl(key: impl Into<String>, value: impl Into<String>, ttl_ms: u64) -> Self {
        Self {
            command: WriteCommand::SetWithTtl {
                key: key.into(),
                value: value.into(),
                ttl_ms,
            },
        }
    }

    /// Create a SetIfAbsentWithTtl command.
    pub fn set_if_absent_with_ttl(key: impl Into<String>, value: impl Into<String>, ttl_ms: u64) -> Self {
        Self {
            command: WriteCommand::SetIfAbsentWithTtl {
                key: key.into(),
                value: value.into(),
                ttl_ms,
            },
        }
    }

    /// Create a CompareAndSwap command.
    pub fn compare_and_swap(key: impl Into<String>, expected: Option<String>, new_value: impl Into<String>) -> Self {
        Self {
            command: WriteCommand::CompareAndSwap {
                key: key.into(),
                expected,
                new_value: new_value.into(),
            },
        }
    }

    /// Create a Delete command.
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            command: WriteCommand::Delete { key: key.into() },
        }
    }
}

/// Result of a write operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WriteResult {
    /// Store revision after the write.
    pub revision: u64,
}

/// Key-value pair with revision metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyValueWithRevision {
    /// The key identifying this entry.
    pub key: String,
    /// The stored value.
    pub value: String,
    /// Key-specific version, incremented on each modification.
    pub version: u64,
    /// Store revision when the key was created.
    pub create_revision: u64,
    /// Store revision of the most recent modification.
    pub mod_revision: u64,
}

/// Request to read a single key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadRequest {
    /// Key to read.
    pub key: String,
}

impl ReadRequest {
    /// Create a read request for the given key.
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Response from a read operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadResult {
    /// The entry, if a live one exists.
    pub kv: Option<KeyValueWithRevision>,
}

/// Request to delete a key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteRequest {
    /// Key to delete.
    pub key: String,
}

impl DeleteRequest {
    /// Create a delete request for the given key.
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Result of a delete operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteResult {
    /// The key that was targeted.
    pub key: String,
    /// Whether a live entry was removed.
    pub deleted: bool,
}

/// Request to scan keys with a given prefix, in key order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanRequest {
    /// Key prefix to match.
    pub prefix: String,
    /// Maximum number of entries to return.
    pub limit: Option<u32>,
}

impl ScanRequest {
    /// Create a scan request for the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            limit: None,
        }
    }

    /// Set the result limit.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Response from a scan operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanResult {
    /// Matching entries in ascending key order.
    pub entries: Vec<KeyValueWithRevision>,
    /// Number of entries returned.
    pub count: u32,
    /// Whether more entries matched beyond the limit.
    pub is_truncated: bool,
}

/// Validate a write command against fixed size limits.
pub fn validate_write_command(command: &WriteCommand) -> Result<(), KeyValueStoreError> {
    let check_key = |key: &str| {
        if key.is_empty() {
            return Err(KeyValueStoreError::EmptyKey);
        }
        let len = key.len();
        if len > MAX_KEY_SIZE as usize {
            Err(KeyValueStoreError::KeyTooLarge {
                size: len as u32,
                max: MAX_KEY_SIZE,
            })
        } else {
            Ok(())
        }
    };

    let check_value = |value: &str| {
        let len = value.len();
        if len > MAX_VALUE_SIZE as usize {
            Err(KeyValueStoreError::ValueTooLarge {
                size: len as u32,
                max: MAX_VALUE_SIZE,
            })
        } else {
            Ok(())
        }
    };

    match command {
        WriteCommand::Set { key, value }
        | WriteCommand::SetWithTtl { key, value, .. }
        | WriteCommand::SetIfAbsentWithTtl { key, value, .. } => {
            check_key(key)?;
            check_value(value)?;
        }
        WriteCommand::CompareAndSwap { key, new_value, .. } => {
            check_key(key)?;
            check_value(new_value)?;
        }
        WriteCommand::CompareAndDelete { key, .. } | WriteCommand::Delete { key } => {
            check_key(key)?;
        }
    }
    Ok(())
}
