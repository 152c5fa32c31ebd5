//! Deterministic store implementations for tests.
//!
//! [`DeterministicKeyValueStore`] is a thread-safe in-memory store
//! supporting every [`WriteCommand`] with lazy TTL expiry; it stands in
//! for the shared production store in unit and scenario tests.
//! [`UnreachableKeyValueStore`] fails every call with
//! [`KeyValueStoreError::Unreachable`] and exists to exercise degraded
//! paths such as the lock's fail-open branch.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::clock::now_unix_ms;
use crate::error::KeyValueStoreError;
use crate::kv::DeleteRequest;
use crate::kv::DeleteResult;
use crate::KeyValueStore;
use crate::kv::KeyValueWithRevision;
use crate::kv::ReadRequest;
use crate::kv::ReadResult;
use crate::kv::ScanRequest;
use crate::kv::ScanResult;
use crate::kv::WriteCommand;
use crate::kv::WriteRequest;
use crate::kv::WriteResult;
use crate::kv::validate_write_command;

/// Versioned value with optional expiry.
#[derive(Clone)]
struct VersionedValue {
    value: String,
    version: u64,
    create_revision: u64,
    mod_revision: u64,
    /// Expiry deadline (Unix ms). None = never expires.
    expires_at_ms: Option<u64>,
}

impl VersionedValue {
    fn is_expired(&self, now_ms: u64) -> bool {
        matches!(self.expires_at_ms, Some(deadline) if now_ms > deadline)
    }
}

/// A deterministic in-memory key-value store for testing.
///
/// Expired entries are treated as absent by every command and collected
/// lazily on access, matching the contract documented on
/// [`crate::KeyValueStore`].
pub struct DeterministicKeyValueStore {
    data: RwLock<BTreeMap<String, VersionedValue>>,
    revision: RwLock<u64>,
}

impl Default for DeterministicKeyValueStore {
    fn default() -> Self {
        Self::new_inner()
    }
}

impl DeterministicKeyValueStore {
    /// Create a new deterministic store wrapped in Arc.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::new_inner())
    }

    fn new_inner() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            revision: RwLock::new(0),
        }
    }

    async fn next_revision(&self) -> u64 {
        let mut rev = self.revision.write().await;
        *rev += 1;
        *rev
    }

    /// Number of live (unexpired) entries.
    pub async fn live_len(&self) -> usize {
        let now = now_unix_ms();
        let data = self.data.read().await;
        data.values().filter(|v| !v.is_expired(now)).count()
    }
}

#[async_trait]
impl KeyValueStore for DeterministicKeyValueStore {
    async fn write(&self, request: WriteRequest) -> Result<WriteResult, KeyValueStoreError> {
        validate_write_command(&request.command)?;
        let revision = self.next_revision().await;
        let now = now_unix_ms();
        let mut data = self.data.write().await;

        let insert = |data: &mut BTreeMap<String, VersionedValue>,
                      key: &str,
                      value: &str,
                      expires_at_ms: Option<u64>| {
            let (version, create_revision) = match data.get(key) {
                Some(prev) if !prev.is_expired(now) => (prev.version + 1, prev.create_revision),
                _ => (1, revision),
            };
            data.insert(key.to_string(), VersionedValue {
                value: value.to_string(),
                version,
                create_revision,
                mod_revision: revision,
                expires_at_ms,
            });
        };

        match &request.command {
            WriteCommand::Set { key, value } => {
                insert(&mut data, key, value, None);
            }
            WriteCommand::SetWithTtl { key, value, ttl_ms } => {
                insert(&mut data, key, value, Some(now + ttl_ms));
            }
            WriteCommand::SetIfAbsentWithTtl { key, value, ttl_ms } => {
                let live = data.get(key).map(|v| !v.is_expired(now)).unwrap_or(false);
                if live {
                    return Err(KeyValueStoreError::KeyAlreadyExists { key: key.clone() });
                }
                // Expired entry is replaced as if absent.
                if data.remove(key).is_some() {
                    debug!(key = %key, "expired entry collected on set-if-absent");
                }
                insert(&mut data, key, value, Some(now + ttl_ms));
            }
            WriteCommand::CompareAndSwap {
                key,
                expected,
                new_value,
            } => {
                let current = data
                    .get(key)
                    .filter(|v| !v.is_expired(now))
                    .map(|v| v.value.clone());
                if current.as_ref() == expected.as_ref() {
                    insert(&mut data, key, new_value, None);
                } else {
                    return Err(KeyValueStoreError::CompareAndSwapFailed {
                        key: key.clone(),
                        expected: expected.clone(),
                        actual: current,
                    });
                }
            }
            WriteCommand::CompareAndDelete { key, expected } => {
                if let Some(v) = data.get(key) {
                    if !v.is_expired(now) && &v.value == expected {
                        data.remove(key);
                    }
                }
            }
            WriteCommand::Delete { key } => {
                data.remove(key);
            }
        }

        Ok(WriteResult { revision })
    }

    async fn read(&self, request: ReadRequest) -> Result<ReadResult, KeyValueStoreError> {
        let now = now_unix_ms();
        let data = self.data.read().await;
        match data.get(&request.key) {
            Some(v) if !v.is_expired(now) => Ok(ReadResult {
                kv: Some(KeyValueWithRevision {
                    key: request.key,
                    value: v.value.clone(),
                    version: v.version,
                    create_revision: v.create_revision,
                    mod_revision: v.mod_revision,
                }),
            }),
            _ => Ok(ReadResult { kv: None }),
        }
    }

    async fn delete(&self, request: DeleteRequest) -> Result<DeleteResult, KeyValueStoreError> {
        let now = now_unix_ms();
        let mut data = self.data.write().await;
        let deleted = match data.remove(&request.key) {
            Some(v) => !v.is_expired(now),
            None => false,
        };
        Ok(DeleteResult {
            key: request.key,
            deleted,
        })
    }

    async fn scan(&self, request: ScanRequest) -> Result<ScanResult, KeyValueStoreError> {
        let now = now_unix_ms();
        let limit = request.limit.unwrap_or(crate::constants::DEFAULT_SCAN_LIMIT) as usize;
        let data = self.data.read().await;

        let mut entries = Vec::new();
        let mut is_truncated = false;
        for (key, v) in data.range(request.prefix.clone()..) {
            if !key.starts_with(&request.prefix) {
                break;
            }
            if v.is_expired(now) {
                continue;
            }
            if entries.len() == limit {
                is_truncated = true;
                break;
            }
            entries.push(KeyValueWithRevision {
                key: key.clone(),
                value: v.value.clone(),
                version: v.version,
                create_revision: v.create_revision,
                mod_revision: v.mod_revision,
            });
        }

        Ok(ScanResult {
            count: entries.len() as u32,
            entries,
            is_truncated,
        })
    }
}

/// A store whose every call fails with [`KeyValueStoreError::Unreachable`].
#[derive(Debug, Default)]
pub struct UnreachableKeyValueStore;

impl UnreachableKeyValueStore {
    /// Create a new always-failing store wrapped in Arc.
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }

    fn outage<T>() -> Result<T, KeyValueStoreError> {
        debug!("simulated store outage");
        Err(KeyValueStoreError::Unreachable {
            reason: "simulated store outage".to_string(),
        })
    }
}

#[async_trait]
impl KeyValueStore for UnreachableKeyValueStore {
    async fn write(&self, _request: WriteRequest) -> Result<WriteResult, KeyValueStoreError> {
        Self::outage()
    }

    async fn read(&self, _request: ReadRequest) -> Result<ReadResult, KeyValueStoreError> {
        Self::outage()
    }

    async fn delete(&self, _request: DeleteRequest) -> Result<DeleteResult, KeyValueStoreError> {
        Self::outage()
    }

    async fn scan(&self, _request: ScanRequest) -> Result<ScanResult, KeyValueStoreError> {
        Self::outage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_if_absent_rejects_live_entry() {
        let store = DeterministicKeyValueStore::new();
        store
            .write(WriteRequest::set_if_absent_with_ttl("k", "a", 60_000))
            .await
            .unwrap();
        let err = store
            .write(WriteRequest::set_if_absent_with_ttl("k", "b", 60_000))
            .await
            .unwrap_err();
        assert!(matches!(err, KeyValueStoreError::KeyAlreadyExists { .. }));
    }

    #[tokio::test]
    async fn set_if_absent_replaces_expired_entry() {
        let store = DeterministicKeyValueStore::new();
        store
            .write(WriteRequest::set_if_absent_with_ttl("k", "a", 0))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store
            .write(WriteRequest::set_if_absent_with_ttl("k", "b", 60_000))
            .await
            .unwrap();
        let read = store.read(ReadRequest::new("k")).await.unwrap();
        assert_eq!(read.kv.unwrap().value, "b");
    }

    #[tokio::test]
    async fn cas_with_expected_none_is_atomic_create() {
        let store = DeterministicKeyValueStore::new();
        store
            .write(WriteRequest::compare_and_swap("k", None, "1"))
            .await
            .unwrap();
        let err = store
            .write(WriteRequest::compare_and_swap("k", None, "2"))
            .await
            .unwrap_err();
        assert!(matches!(err, KeyValueStoreError::CompareAndSwapFailed { .. }));

        store
            .write(WriteRequest::compare_and_swap("k", Some("1".to_string()), "2"))
            .await
            .unwrap();
        let read = store.read(ReadRequest::new("k")).await.unwrap();
        assert_eq!(read.kv.unwrap().value, "2");
    }

    #[tokio::test]
    async fn expired_entries_are_absent_for_reads() -> anyhow::Result<()> {
        let store = DeterministicKeyValueStore::new();
        store.write(WriteRequest::set_with_ttl("k", "v", 0)).await?;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let read = store.read(ReadRequest::new("k")).await?;
        assert!(read.kv.is_none());
        assert_eq!(store.live_len().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn scan_returns_prefix_matches_in_order() -> anyhow::Result<()> {
        let store = DeterministicKeyValueStore::new();
        for id in ["b", "a", "c"] {
            store.write(WriteRequest::set(format!("p:{id}"), id)).await?;
        }
        store.write(WriteRequest::set("q:z", "z")).await?;

        let result = store.scan(ScanRequest::new("p:")).await?;
        let keys: Vec<_> = result.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["p:a", "p:b", "p:c"]);
        assert!(!result.is_truncated);
        Ok(())
    }

    #[tokio::test]
    async fn scan_honors_limit() {
        let store = DeterministicKeyValueStore::new();
        for i in 0..5 {
            store
                .write(WriteRequest::set(format!("p:{i}"), "v"))
                .await
                .unwrap();
        }
        let result = store.scan(ScanRequest::new("p:").with_limit(2)).await.unwrap();
        assert_eq!(result.count, 2);
        assert!(result.is_truncated);
    }
}
