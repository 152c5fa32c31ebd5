//! Shared state types for coordination primitives.
//!
//! Both are serialized as JSON for human readability when inspecting the
//! store during an incident.

use lanyard_core::now_unix_ms;
use serde::Deserialize;
use serde::Serialize;

/// Lock entry stored under the lock key for the duration of a hold.
///
/// Ephemeral: exists only between acquire and release/expiry. The store's
/// TTL enforces expiry; the timestamps here serve `remaining_ttl` queries
/// and debugging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockEntry {
    /// Random identifier minted for this acquisition.
    pub holder_id: String,
    /// When the lock was acquired (Unix ms).
    pub acquired_at_ms: u64,
    /// TTL in milliseconds.
    pub ttl_ms: u64,
    /// Deadline = acquired_at_ms + ttl_ms.
    pub deadline_ms: u64,
}

impl LockEntry {
    /// Create a new lock entry starting now.
    pub fn new(holder_id: String, ttl_ms: u64) -> Self {
        let acquired_at_ms = now_unix_ms();
        Self {
            holder_id,
            acquired_at_ms,
            ttl_ms,
            deadline_ms: acquired_at_ms + ttl_ms,
        }
    }

    /// Remaining TTL in milliseconds (0 if expired).
    pub fn remaining_ttl_ms(&self) -> u64 {
        self.deadline_ms.saturating_sub(now_unix_ms())
    }
}

/// Durable counter state for one (namespace, date-bucket) pair.
///
/// Created lazily on first issuance for a bucket and never deleted, so
/// the last issued identifier stays auditable after the day rolls over.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SequenceCounter {
    /// Sanitized namespace code (e.g. an exhibition short code).
    pub namespace: String,
    /// Calendar day bucket, DDMMYYYY in the configured timezone.
    pub date_bucket: String,
    /// Last issued sequence value (first issuance stores 1).
    pub sequence: u64,
    /// The formatted identifier most recently issued.
    pub last_issued: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_entry_remaining_ttl_counts_down_from_ttl() {
        let entry = LockEntry::new("holder".to_string(), 30_000);
        assert!(entry.remaining_ttl_ms() > 29_000);
        assert!(entry.remaining_ttl_ms() <= 30_000);
    }

    #[test]
    fn expired_lock_entry_reports_zero() {
        let entry = LockEntry {
            holder_id: "holder".to_string(),
            acquired_at_ms: 0,
            ttl_ms: 1,
            deadline_ms: 1,
        };
        assert_eq!(entry.remaining_ttl_ms(), 0);
    }
}
