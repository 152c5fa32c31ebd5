//! Distributed mutual-exclusion lock with TTL expiry.
//!
//! The lock is a try-once primitive: acquisition is a single
//! set-if-absent-with-expiry command, losers get an immediate `false`,
//! and nothing queues or blocks. Callers that want retry implement their
//! own backoff. Entries self-expire via TTL, so a crashed holder never
//! wedges the key.
//!
//! Failure policy: if the shared store is unreachable, `acquire` fails
//! open - it returns `true` as if the lock were granted, trading strict
//! mutual exclusion for availability during store outages. The degraded
//! grant is logged as a warning.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use lanyard_core::DeleteRequest;
use lanyard_core::KeyValueStore;
use lanyard_core::KeyValueStoreError;
use lanyard_core::ReadRequest;
use lanyard_core::WriteRequest;
use lanyard_core::constants::DEFAULT_LOCK_TTL_MS;
use tracing::debug;
use tracing::warn;

use crate::error::CoordinationError;
use crate::types::LockEntry;

/// Configuration for [`DistributedLock`].
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// TTL applied when the caller passes no explicit TTL.
    pub default_ttl_ms: u64,
    /// Whether an unreachable store grants the lock (fail-open).
    ///
    /// On by default: lock sites guard side effects whose duplication is
    /// preferable to rejecting the primary operation during an outage.
    pub fail_open: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: DEFAULT_LOCK_TTL_MS,
            fail_open: true,
        }
    }
}

/// Outcome of [`DistributedLock::with_lock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome<T> {
    /// The lock was acquired and the critical section ran to completion.
    Completed(T),
    /// The lock was held elsewhere; the critical section did not run.
    Busy,
}

impl<T> LockOutcome<T> {
    /// The critical section's output, if it ran.
    pub fn completed(self) -> Option<T> {
        match self {
            LockOutcome::Completed(value) => Some(value),
            LockOutcome::Busy => None,
        }
    }

    /// Whether the lock was held elsewhere.
    pub fn is_busy(&self) -> bool {
        matches!(self, LockOutcome::Busy)
    }
}

/// Proof of a specific acquisition, for owner-checked release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolder {
    /// The lock key.
    pub key: String,
    /// Random identifier minted for this acquisition.
    pub holder_id: String,
}

/// Distributed try-once lock over the shared key-value store.
///
/// Key convention: `{domain}:{operation}:{identifier}`, e.g.
/// `otp:send:+91XXXXXXXXXX` or `checkin-lock:{registration_number}`.
pub struct DistributedLock<S: KeyValueStore + ?Sized> {
    store: Arc<S>,
    config: LockConfig,
}

impl<S: KeyValueStore + ?Sized> DistributedLock<S> {
    /// Create a new lock handle over the shared store.
    pub fn new(store: Arc<S>, config: LockConfig) -> Self {
        Self { store, config }
    }

    /// Attempt to acquire the lock without blocking.
    ///
    /// Returns `Ok(true)` iff this call created the entry (or the store
    /// was unreachable and the configured fail-open branch granted the
    /// lock). Returns `Ok(false)` when a live entry exists.
    pub async fn acquire(&self, key: &str, ttl: Option<Duration>) -> Result<bool, CoordinationError> {
        Ok(self.try_create(key, ttl).await?.is_some())
    }

    /// Acquire with an owner token for owner-checked release.
    ///
    /// Same semantics as [`Self::acquire`], but a successful acquisition
    /// returns a [`LockHolder`] accepted by [`Self::release_owned`].
    pub async fn acquire_owned(&self, key: &str, ttl: Option<Duration>) -> Result<Option<LockHolder>, CoordinationError> {
        Ok(self.try_create(key, ttl).await?.map(|entry| LockHolder {
            key: key.to_string(),
            holder_id: entry.holder_id,
        }))
    }

    /// Release the lock unconditionally.
    ///
    /// No ownership is verified: any caller can delete the key. This
    /// mirrors the platform's original release semantics; callers that
    /// need the stronger guarantee use [`Self::acquire_owned`] /
    /// [`Self::release_owned`].
    pub async fn release(&self, key: &str) -> Result<(), CoordinationError> {
        match self.store.delete(DeleteRequest::new(key)).await {
            Ok(_) => {
                debug!(key, "lock released");
                Ok(())
            }
            // TTL expiry will clear the entry; do not fail the caller's
            // primary operation over a release that cannot reach the store.
            Err(KeyValueStoreError::Unreachable { reason }) => {
                warn!(key, reason, "lock release skipped, entry will expire via TTL");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Release only if this holder's entry is still in place.
    ///
    /// Returns `Ok(true)` when the stored entry still carried this
    /// holder's id at the time of the check; `Ok(false)` when the entry
    /// was absent or held by someone else (e.g. after TTL expiry and
    /// re-acquisition), in which case nothing is deleted.
    pub async fn release_owned(&self, holder: &LockHolder) -> Result<bool, CoordinationError> {
        let read = self.store.read(ReadRequest::new(&holder.key)).await?;
        let Some(kv) = read.kv else {
            return Ok(false);
        };
        let entry: LockEntry =
            serde_json::from_str(&kv.value).map_err(|e| CoordinationError::CorruptedData {
                key: holder.key.clone(),
                reason: e.to_string(),
            })?;
        if entry.holder_id != holder.holder_id {
            debug!(key = %holder.key, "owned release skipped, lock re-acquired elsewhere");
            return Ok(false);
        }
        // Conditional on the exact stored value: if another holder swaps
        // in between the read and the delete, the delete is a no-op.
        self.store
            .write(WriteRequest {
                command: lanyard_core::WriteCommand::CompareAndDelete {
                    key: holder.key.clone(),
                    expected: kv.value,
                },
            })
            .await?;
        debug!(key = %holder.key, "lock released by owner");
        Ok(true)
    }

    /// Run `f` under the lock, releasing afterwards regardless of how
    /// `f`'s output turned out.
    ///
    /// Returns [`LockOutcome::Busy`] without running `f` when the lock
    /// is held elsewhere.
    pub async fn with_lock<F, Fut, T>(&self, key: &str, ttl: Option<Duration>, f: F) -> Result<LockOutcome<T>, CoordinationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if !self.acquire(key, ttl).await? {
            return Ok(LockOutcome::Busy);
        }
        let output = f().await;
        self.release(key).await?;
        Ok(LockOutcome::Completed(output))
    }

    /// Whether a live entry currently exists under the key.
    pub async fn is_locked(&self, key: &str) -> Result<bool, CoordinationError> {
        let read = self.store.read(ReadRequest::new(key)).await?;
        Ok(read.kv.is_some())
    }

    /// Remaining TTL of the current hold, or `None` when unlocked.
    pub async fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>, CoordinationError> {
        let read = self.store.read(ReadRequest::new(key)).await?;
        let Some(kv) = read.kv else {
            return Ok(None);
        };
        let entry: LockEntry =
            serde_json::from_str(&kv.value).map_err(|e| CoordinationError::CorruptedData {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Some(Duration::from_millis(entry.remaining_ttl_ms())))
    }

    /// Attempt the atomic create; `None` means the lock is held.
    async fn try_create(&self, key: &str, ttl: Option<Duration>) -> Result<Option<LockEntry>, CoordinationError> {
        let ttl_ms = ttl.map(|t| t.as_millis() as u64).unwrap_or(self.config.default_ttl_ms);
        let holder_id = format!("{:016x}", rand::random::<u64>());
        let entry = LockEntry::new(holder_id, ttl_ms);
        let value = serde_json::to_string(&entry)?;

        match self
            .store
            .write(WriteRequest::set_if_absent_with_ttl(key, value, ttl_ms))
            .await
        {
            Ok(_) => {
                debug!(key, holder_id = %entry.holder_id, ttl_ms, "lock acquired");
                Ok(Some(entry))
            }
            Err(KeyValueStoreError::KeyAlreadyExists { .. }) => {
                debug!(key, "lock busy");
                Ok(None)
            }
            // Fail-open: grant the lock without exclusivity rather than
            // blocking the primary operation during a store outage.
            Err(KeyValueStoreError::Unreachable { reason }) if self.config.fail_open => {
                warn!(key, reason, "lock store unreachable, failing open without exclusivity");
                Ok(Some(entry))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use lanyard_core::test_support::DeterministicKeyValueStore;
    use lanyard_core::test_support::UnreachableKeyValueStore;

    use super::*;

    fn lock_over(store: Arc<DeterministicKeyValueStore>) -> DistributedLock<DeterministicKeyValueStore> {
        DistributedLock::new(store, LockConfig::default())
    }

    #[tokio::test]
    async fn second_acquire_is_rejected_while_held() -> anyhow::Result<()> {
        let store = DeterministicKeyValueStore::new();
        let lock = lock_over(store);

        assert!(lock.acquire("otp:send:+910000000000", None).await?);
        assert!(!lock.acquire("otp:send:+910000000000", None).await?);

        lock.release("otp:send:+910000000000").await?;
        assert!(lock.acquire("otp:send:+910000000000", None).await?);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_acquires_grant_exactly_one() {
        let store = DeterministicKeyValueStore::new();
        let lock = Arc::new(lock_over(store));

        let key = "checkin-lock:REG-ABSE-01122025-000001";
        let mut handles = Vec::new();
        for _ in 0..20 {
            let lock = lock.clone();
            handles.push(tokio::spawn(async move {
                lock.acquire(key, Some(Duration::from_millis(10_000))).await.unwrap()
            }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 1);
    }

    #[tokio::test]
    async fn expired_lock_can_be_reacquired() {
        let store = DeterministicKeyValueStore::new();
        let lock = lock_over(store);

        assert!(lock.acquire("k", Some(Duration::from_millis(0))).await.unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(lock.acquire("k", None).await.unwrap());
    }

    #[tokio::test]
    async fn with_lock_runs_and_releases() {
        let store = DeterministicKeyValueStore::new();
        let lock = lock_over(store);

        let outcome = lock
            .with_lock("k", None, || async { 41 + 1 })
            .await
            .unwrap();
        assert_eq!(outcome, LockOutcome::Completed(42));
        assert!(!lock.is_locked("k").await.unwrap());
    }

    #[tokio::test]
    async fn with_lock_releases_even_when_section_fails() {
        let store = DeterministicKeyValueStore::new();
        let lock = lock_over(store);

        let outcome = lock
            .with_lock("k", None, || async { Err::<(), &str>("handler error") })
            .await
            .unwrap();
        assert!(matches!(outcome, LockOutcome::Completed(Err("handler error"))));
        assert!(!lock.is_locked("k").await.unwrap());
    }

    #[tokio::test]
    async fn with_lock_reports_busy_without_running_section() {
        let store = DeterministicKeyValueStore::new();
        let lock = lock_over(store);

        assert!(lock.acquire("k", None).await.unwrap());
        let ran = std::sync::atomic::AtomicBool::new(false);
        let outcome = lock
            .with_lock("k", None, || async {
                ran.store(true, std::sync::atomic::Ordering::SeqCst);
            })
            .await
            .unwrap();
        assert!(outcome.is_busy());
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unreachable_store_fails_open() {
        let store = UnreachableKeyValueStore::new();
        let lock = DistributedLock::new(store, LockConfig::default());
        assert!(lock.acquire("k", None).await.unwrap());
        // Release must not error either; TTL handles the (nonexistent) entry.
        lock.release("k").await.unwrap();
    }

    #[tokio::test]
    async fn fail_open_can_be_disabled() {
        let store = UnreachableKeyValueStore::new();
        let lock = DistributedLock::new(store, LockConfig {
            fail_open: false,
            ..LockConfig::default()
        });
        assert!(lock.acquire("k", None).await.is_err());
    }

    #[tokio::test]
    async fn owned_release_skips_foreign_holder() {
        let store = DeterministicKeyValueStore::new();
        let lock = lock_over(store);

        let holder = lock
            .acquire_owned("k", Some(Duration::from_millis(0)))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        // Expired and re-acquired by someone else.
        assert!(lock.acquire("k", None).await.unwrap());
        assert!(!lock.release_owned(&holder).await.unwrap());
        assert!(lock.is_locked("k").await.unwrap());
    }

    #[tokio::test]
    async fn owned_release_removes_own_entry() {
        let store = DeterministicKeyValueStore::new();
        let lock = lock_over(store);

        let holder = lock.acquire_owned("k", None).await.unwrap().unwrap();
        assert!(lock.release_owned(&holder).await.unwrap());
        assert!(!lock.is_locked("k").await.unwrap());
    }

    #[tokio::test]
    async fn remaining_ttl_reflects_hold() {
        let store = DeterministicKeyValueStore::new();
        let lock = lock_over(store);

        assert!(lock.remaining_ttl("k").await.unwrap().is_none());
        lock.acquire("k", Some(Duration::from_millis(10_000))).await.unwrap();
        let remaining = lock.remaining_ttl("k").await.unwrap().unwrap();
        assert!(remaining > Duration::from_millis(9_000));
        assert!(remaining <= Duration::from_millis(10_000));
    }
}
