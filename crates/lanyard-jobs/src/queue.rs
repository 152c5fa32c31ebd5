//! The durable job queue: enqueue, claim, transitions, and admin ops.
//!
//! Job records are the source of truth; every state transition is a
//! compare-and-swap on the record's stored JSON, so two workers racing
//! on one job resolve to exactly one winner. The waiting/state/
//! correlation indexes are advisory - they are written around the
//! deciding CAS, repaired lazily when found stale, and feed only scans
//! and approximate stats.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lanyard_core::DeleteRequest;
use lanyard_core::KeyValueStore;
use lanyard_core::KeyValueStoreError;
use lanyard_core::ReadRequest;
use lanyard_core::ScanRequest;
use lanyard_core::WriteRequest;
use lanyard_core::constants::DEFAULT_SCAN_LIMIT;
use lanyard_core::constants::MAX_CAS_RETRIES;
use lanyard_core::now_unix_ms;
use tracing::debug;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::error::JobError;
use crate::job::EnqueueOptions;
use crate::job::JobKind;
use crate::job::JobRecord;
use crate::job::JobState;
use crate::job::JobStatusReport;
use crate::job::QueueStats;
use crate::keys;
use crate::policy::KindPolicy;

/// How many waiting-index entries a single claim pass inspects.
const CLAIM_SCAN_LIMIT: u32 = 32;

/// Configuration for [`JobQueue`].
#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    /// Retry/retention policy per kind.
    pub policies: HashMap<JobKind, KindPolicy>,
    /// CAS attempts for the enqueue-sequence counter.
    pub max_cas_retries: u32,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        let mut policies = HashMap::new();
        for kind in JobKind::all() {
            policies.insert(kind, KindPolicy::for_kind(kind));
        }
        Self {
            policies,
            max_cas_retries: MAX_CAS_RETRIES,
        }
    }
}

/// A job claimed by a worker.
///
/// Holds the exact stored JSON of the active record so the completing
/// transition can CAS against it; a stale claim (e.g. after the job was
/// administratively removed) then loses cleanly.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    /// The record as stored at claim time (state `Active`).
    pub record: JobRecord,
    pub(crate) raw_active: String,
}

/// Durable job queue over the shared key-value store.
pub struct JobQueue<S: KeyValueStore + ?Sized> {
    store: Arc<S>,
    config: JobQueueConfig,
}

impl<S: KeyValueStore + ?Sized> JobQueue<S> {
    /// Create a new queue over the shared store.
    pub fn new(store: Arc<S>, config: JobQueueConfig) -> Self {
        Self { store, config }
    }

    /// The policy in force for a kind.
    pub fn policy(&self, kind: JobKind) -> KindPolicy {
        self.config
            .policies
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| KindPolicy::for_kind(kind))
    }

    /// Append a job and return immediately.
    ///
    /// For best-effort kinds (print, message) a storage failure is
    /// logged and `Ok(None)` returned: the caller's primary transaction
    /// must not be rolled back by a notification that could not be
    /// queued. For critical kinds (OTP) the error propagates.
    pub async fn enqueue(
        &self,
        kind: JobKind,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> Result<Option<String>, JobError> {
        match self.enqueue_inner(kind, payload, &opts).await {
            Ok(id) => Ok(Some(id)),
            Err(e) if !kind.is_critical() => {
                warn!(%kind, error = %e, "best-effort enqueue failed, continuing without job");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn enqueue_inner(
        &self,
        kind: JobKind,
        payload: serde_json::Value,
        opts: &EnqueueOptions,
    ) -> Result<String, JobError> {
        let id = Uuid::new_v4().to_string();
        let waiting_seq = self.next_enqueue_seq(kind).await?;
        let record = JobRecord {
            id: id.clone(),
            kind,
            payload,
            state: JobState::Waiting,
            attempts_made: 0,
            max_attempts: opts.max_attempts.unwrap_or(self.policy(kind).max_attempts),
            created_at_ms: now_unix_ms(),
            waiting_seq,
            correlation_id: opts.correlation_id.clone(),
            progress: 0,
            result: None,
            error: None,
            next_attempt_at_ms: None,
            finished_at_ms: None,
        };

        self.store
            .write(WriteRequest::set(keys::job_key(&id), serde_json::to_string(&record)?))
            .await?;
        self.store
            .write(WriteRequest::set(keys::waiting_key(kind, waiting_seq), &id))
            .await?;
        self.store
            .write(WriteRequest::set(keys::state_key(kind, JobState::Waiting, &id), &id))
            .await?;
        if let Some(correlation_id) = &opts.correlation_id {
            self.store
                .write(WriteRequest::set(keys::correlation_key(correlation_id, &id), &id))
                .await?;
        }

        debug!(%kind, job_id = %id, waiting_seq, "job enqueued");
        Ok(id)
    }

    /// Status snapshot for a job id.
    ///
    /// Returns a `NotFound` snapshot once retention pruning has removed
    /// the record; repeated queries of a terminal job return an
    /// unchanged snapshot until then.
    pub async fn status(&self, id: &str) -> Result<JobStatusReport, JobError> {
        match self.read_record_raw(id).await? {
            Some((record, _)) => Ok(JobStatusReport::from(&record)),
            None => Ok(JobStatusReport::not_found()),
        }
    }

    /// Claim the oldest waiting job of a kind, if any.
    ///
    /// The claim is a CAS of the record from `Waiting` to `Active`
    /// (incrementing `attempts_made`); of N workers racing on one job,
    /// exactly one wins and the rest move on to the next index entry.
    pub async fn claim_next(&self, kind: JobKind) -> Result<Option<ClaimedJob>, JobError> {
        let scan = self
            .store
            .scan(ScanRequest::new(keys::waiting_prefix(kind)).with_limit(CLAIM_SCAN_LIMIT))
            .await?;

        for entry in scan.entries {
            let id = entry.value;
            let Some((record, raw)) = self.read_record_raw(&id).await? else {
                // Record pruned or removed; repair the index.
                self.delete_key(&entry.key).await?;
                continue;
            };
            if record.state != JobState::Waiting {
                self.delete_key(&entry.key).await?;
                continue;
            }

            let mut active = record.clone();
            active.state = JobState::Active;
            active.attempts_made += 1;
            let raw_active = serde_json::to_string(&active)?;

            match self
                .store
                .write(WriteRequest::compare_and_swap(
                    keys::job_key(&id),
                    Some(raw),
                    raw_active.clone(),
                ))
                .await
            {
                Ok(_) => {
                    self.delete_key(&entry.key).await?;
                    self.move_state_index(kind, &id, JobState::Waiting, JobState::Active).await?;
                    debug!(%kind, job_id = %id, attempt = active.attempts_made, "job claimed");
                    return Ok(Some(ClaimedJob {
                        record: active,
                        raw_active,
                    }));
                }
                Err(KeyValueStoreError::CompareAndSwapFailed { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(None)
    }

    /// Record a successful attempt; the job becomes terminal `Completed`.
    pub async fn complete(&self, claimed: &ClaimedJob, result: serde_json::Value) -> Result<(), JobError> {
        let mut completed = claimed.record.clone();
        completed.state = JobState::Completed;
        completed.progress = 100;
        completed.result = Some(result);
        completed.error = None;
        completed.finished_at_ms = Some(now_unix_ms());

        if !self.swap_claimed(claimed, &completed).await? {
            return Ok(());
        }
        self.move_state_index(completed.kind, &completed.id, JobState::Active, JobState::Completed)
            .await?;
        debug!(kind = %completed.kind, job_id = %completed.id, "job completed");
        Ok(())
    }

    /// Record a failed attempt.
    ///
    /// Schedules a retry (`Delayed` until the backoff deadline) while
    /// attempts remain; otherwise the job lands in terminal `Failed`.
    /// Returns the resulting state.
    pub async fn record_failure(&self, claimed: &ClaimedJob, error: &str) -> Result<JobState, JobError> {
        let record = &claimed.record;
        let policy = self.policy(record.kind);
        let mut updated = record.clone();
        updated.error = Some(error.to_string());

        let next_state = if record.attempts_made >= record.max_attempts {
            updated.state = JobState::Failed;
            updated.finished_at_ms = Some(now_unix_ms());
            updated.next_attempt_at_ms = None;
            JobState::Failed
        } else {
            let delay = policy.backoff_delay(record.attempts_made);
            updated.state = JobState::Delayed;
            updated.next_attempt_at_ms = Some(now_unix_ms() + delay.as_millis() as u64);
            JobState::Delayed
        };

        if !self.swap_claimed(claimed, &updated).await? {
            return Ok(next_state);
        }
        self.move_state_index(record.kind, &record.id, JobState::Active, next_state).await?;

        match next_state {
            JobState::Failed => {
                warn!(kind = %record.kind, job_id = %record.id, attempts = record.attempts_made, error, "job failed terminally");
            }
            _ => {
                debug!(kind = %record.kind, job_id = %record.id, attempt = record.attempts_made, error, "job delayed for retry");
            }
        }
        Ok(next_state)
    }

    /// Move due `Delayed` jobs back to `Waiting`. Returns the count.
    pub async fn promote_due(&self, kind: JobKind) -> Result<u32, JobError> {
        let now = now_unix_ms();
        let scan = self
            .store
            .scan(ScanRequest::new(keys::state_prefix(kind, JobState::Delayed)))
            .await?;

        let mut promoted = 0;
        for entry in scan.entries {
            let id = entry.value;
            let Some((record, raw)) = self.read_record_raw(&id).await? else {
                self.delete_key(&entry.key).await?;
                continue;
            };
            if record.state != JobState::Delayed {
                self.delete_key(&entry.key).await?;
                continue;
            }
            if record.next_attempt_at_ms.map(|due| due > now).unwrap_or(false) {
                continue;
            }

            let waiting_seq = self.next_enqueue_seq(kind).await?;
            let mut waiting = record.clone();
            waiting.state = JobState::Waiting;
            waiting.waiting_seq = waiting_seq;
            waiting.next_attempt_at_ms = None;

            match self
                .store
                .write(WriteRequest::compare_and_swap(
                    keys::job_key(&id),
                    Some(raw),
                    serde_json::to_string(&waiting)?,
                ))
                .await
            {
                Ok(_) => {
                    self.store
                        .write(WriteRequest::set(keys::waiting_key(kind, waiting_seq), &id))
                        .await?;
                    self.move_state_index(kind, &id, JobState::Delayed, JobState::Waiting).await?;
                    promoted += 1;
                }
                Err(KeyValueStoreError::CompareAndSwapFailed { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if promoted > 0 {
            debug!(%kind, promoted, "promoted delayed jobs");
        }
        Ok(promoted)
    }

    /// Manually re-queue a terminally `Failed` job with a fresh attempt
    /// budget.
    pub async fn retry_job(&self, id: &str) -> Result<(), JobError> {
        let Some((record, raw)) = self.read_record_raw(id).await? else {
            return Err(JobError::JobNotFound { id: id.to_string() });
        };
        if record.state != JobState::Failed {
            return Err(JobError::InvalidJobState {
                state: record.state.to_string(),
                operation: "retry_job".to_string(),
            });
        }

        let waiting_seq = self.next_enqueue_seq(record.kind).await?;
        let mut waiting = record.clone();
        waiting.state = JobState::Waiting;
        waiting.attempts_made = 0;
        waiting.waiting_seq = waiting_seq;
        waiting.error = None;
        waiting.finished_at_ms = None;
        waiting.next_attempt_at_ms = None;

        match self
            .store
            .write(WriteRequest::compare_and_swap(
                keys::job_key(id),
                Some(raw),
                serde_json::to_string(&waiting)?,
            ))
            .await
        {
            Ok(_) => {}
            // A concurrent admin action won; treat as already handled.
            Err(KeyValueStoreError::CompareAndSwapFailed { .. }) => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        self.store
            .write(WriteRequest::set(keys::waiting_key(record.kind, waiting_seq), id))
            .await?;
        self.move_state_index(record.kind, id, JobState::Failed, JobState::Waiting).await?;
        info!(kind = %record.kind, job_id = %id, "failed job manually re-queued");
        Ok(())
    }

    /// Remove a job and its index entries.
    pub async fn remove_job(&self, id: &str) -> Result<(), JobError> {
        let Some((record, _)) = self.read_record_raw(id).await? else {
            return Err(JobError::JobNotFound { id: id.to_string() });
        };

        self.delete_key(&keys::job_key(id)).await?;
        self.delete_key(&keys::waiting_key(record.kind, record.waiting_seq)).await?;
        self.delete_key(&keys::state_key(record.kind, record.state, id)).await?;
        if let Some(correlation_id) = &record.correlation_id {
            self.delete_key(&keys::correlation_key(correlation_id, id)).await?;
        }
        debug!(kind = %record.kind, job_id = %id, "job removed");
        Ok(())
    }

    /// Prune `Completed` jobs older than `grace`. Returns the count.
    pub async fn clean_queue(&self, kind: JobKind, grace: Duration) -> Result<u32, JobError> {
        let cutoff = now_unix_ms().saturating_sub(grace.as_millis() as u64);
        let scan = self
            .store
            .scan(ScanRequest::new(keys::state_prefix(kind, JobState::Completed)))
            .await?;

        let mut removed = 0;
        for entry in scan.entries {
            let id = entry.value;
            let Some((record, _)) = self.read_record_raw(&id).await? else {
                self.delete_key(&entry.key).await?;
                continue;
            };
            if record.state != JobState::Completed {
                continue;
            }
            if record.finished_at_ms.map(|at| at < cutoff).unwrap_or(true) {
                match self.remove_job(&id).await {
                    Ok(()) => removed += 1,
                    Err(JobError::JobNotFound { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        if removed > 0 {
            info!(%kind, removed, "cleaned completed jobs");
        }
        Ok(removed)
    }

    /// Apply the kind's retention policy to completed and failed jobs.
    ///
    /// Completed jobs are pruned past their retention age, and beyond
    /// the configured count cap oldest-first. Failed jobs are kept
    /// longer for operator diagnosis and pruned only by age. Returns
    /// the total pruned.
    pub async fn sweep_retention(&self, kind: JobKind) -> Result<u32, JobError> {
        let policy = self.policy(kind);
        let mut removed = self.clean_queue(kind, policy.completed_retention).await?;

        // Count cap on completed jobs, oldest first.
        let scan = self
            .store
            .scan(ScanRequest::new(keys::state_prefix(kind, JobState::Completed)))
            .await?;
        if scan.entries.len() > policy.completed_max_count as usize {
            let mut records = Vec::new();
            for entry in &scan.entries {
                if let Some((record, _)) = self.read_record_raw(&entry.value).await? {
                    if record.state == JobState::Completed {
                        records.push(record);
                    }
                }
            }
            records.sort_by_key(|r| r.finished_at_ms.unwrap_or(0));
            let excess = records.len().saturating_sub(policy.completed_max_count as usize);
            for record in records.into_iter().take(excess) {
                match self.remove_job(&record.id).await {
                    Ok(()) => removed += 1,
                    Err(JobError::JobNotFound { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        // Failed jobs age out on their own, longer, window.
        let cutoff = now_unix_ms().saturating_sub(policy.failed_retention.as_millis() as u64);
        let scan = self
            .store
            .scan(ScanRequest::new(keys::state_prefix(kind, JobState::Failed)))
            .await?;
        for entry in scan.entries {
            let id = entry.value;
            let Some((record, _)) = self.read_record_raw(&id).await? else {
                self.delete_key(&entry.key).await?;
                continue;
            };
            if record.state == JobState::Failed
                && record.finished_at_ms.map(|at| at < cutoff).unwrap_or(true)
            {
                match self.remove_job(&id).await {
                    Ok(()) => removed += 1,
                    Err(JobError::JobNotFound { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(removed)
    }

    /// Approximate per-state counts for a kind.
    pub async fn stats(&self, kind: JobKind) -> Result<QueueStats, JobError> {
        Ok(QueueStats {
            waiting: self.count_state(kind, JobState::Waiting).await?,
            active: self.count_state(kind, JobState::Active).await?,
            delayed: self.count_state(kind, JobState::Delayed).await?,
            completed: self.count_state(kind, JobState::Completed).await?,
            failed: self.count_state(kind, JobState::Failed).await?,
        })
    }

    /// Jobs grouped under a parent entity, newest-agnostic index order,
    /// optionally filtered by state.
    pub async fn list_by_correlation(
        &self,
        correlation_id: &str,
        state: Option<JobState>,
        limit: u32,
    ) -> Result<Vec<JobRecord>, JobError> {
        let scan = self
            .store
            .scan(ScanRequest::new(keys::correlation_prefix(correlation_id)).with_limit(DEFAULT_SCAN_LIMIT))
            .await?;

        let mut records = Vec::new();
        for entry in scan.entries {
            if records.len() == limit as usize {
                break;
            }
            let Some((record, _)) = self.read_record_raw(&entry.value).await? else {
                self.delete_key(&entry.key).await?;
                continue;
            };
            if state.map(|s| record.state == s).unwrap_or(true) {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// CAS the record from its claimed JSON to `updated`.
    ///
    /// Returns false (with a warning) when the claim went stale - the
    /// record was removed or transitioned elsewhere - in which case the
    /// job's current state wins and no indexes are touched.
    async fn swap_claimed(&self, claimed: &ClaimedJob, updated: &JobRecord) -> Result<bool, JobError> {
        match self
            .store
            .write(WriteRequest::compare_and_swap(
                keys::job_key(&claimed.record.id),
                Some(claimed.raw_active.clone()),
                serde_json::to_string(updated)?,
            ))
            .await
        {
            Ok(_) => Ok(true),
            Err(KeyValueStoreError::CompareAndSwapFailed { .. }) => {
                warn!(job_id = %claimed.record.id, "stale claim, job transitioned elsewhere");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn count_state(&self, kind: JobKind, state: JobState) -> Result<u64, JobError> {
        let scan = self
            .store
            .scan(ScanRequest::new(keys::state_prefix(kind, state)))
            .await?;
        Ok(scan.count as u64)
    }

    async fn move_state_index(
        &self,
        kind: JobKind,
        id: &str,
        from: JobState,
        to: JobState,
    ) -> Result<(), JobError> {
        self.delete_key(&keys::state_key(kind, from, id)).await?;
        self.store
            .write(WriteRequest::set(keys::state_key(kind, to, id), id))
            .await?;
        Ok(())
    }

    async fn delete_key(&self, key: &str) -> Result<(), JobError> {
        self.store.delete(DeleteRequest::new(key)).await?;
        Ok(())
    }

    async fn read_record_raw(&self, id: &str) -> Result<Option<(JobRecord, String)>, JobError> {
        let key = keys::job_key(id);
        let read = self.store.read(ReadRequest::new(&key)).await?;
        match read.kv {
            None => Ok(None),
            Some(kv) => {
                let record: JobRecord =
                    serde_json::from_str(&kv.value).map_err(|e| JobError::CorruptedData {
                        key,
                        reason: e.to_string(),
                    })?;
                Ok(Some((record, kv.value)))
            }
        }
    }

    /// Next FIFO position for a kind, via a CAS counter.
    async fn next_enqueue_seq(&self, kind: JobKind) -> Result<u64, JobError> {
        let key = keys::enqueue_seq_key(kind);
        for _ in 0..self.config.max_cas_retries {
            let read = self.store.read(ReadRequest::new(&key)).await?;
            let (expected, next) = match &read.kv {
                None => (None, 1u64),
                Some(kv) => {
                    let current: u64 =
                        kv.value.parse().map_err(|_| JobError::CorruptedData {
                            key: key.clone(),
                            reason: format!("non-numeric sequence value: {}", kv.value),
                        })?;
                    (Some(kv.value.clone()), current + 1)
                }
            };
            match self
                .store
                .write(WriteRequest::compare_and_swap(&key, expected, next.to_string()))
                .await
            {
                Ok(_) => return Ok(next),
                Err(KeyValueStoreError::CompareAndSwapFailed { .. }) => {
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(JobError::MaxRetriesExceeded {
            operation: format!("enqueue sequence for {kind}"),
            attempts: self.config.max_cas_retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use lanyard_core::test_support::DeterministicKeyValueStore;

    use super::*;

    fn queue(store: Arc<DeterministicKeyValueStore>) -> JobQueue<DeterministicKeyValueStore> {
        JobQueue::new(store, JobQueueConfig::default())
    }

    fn fast_retry_config() -> JobQueueConfig {
        let mut config = JobQueueConfig::default();
        for policy in config.policies.values_mut() {
            policy.initial_backoff = Duration::from_millis(1);
            policy.max_backoff = Duration::from_millis(2);
        }
        config
    }

    #[tokio::test]
    async fn enqueue_then_status_is_waiting() -> anyhow::Result<()> {
        let store = DeterministicKeyValueStore::new();
        let q = queue(store);

        let id = q
            .enqueue(JobKind::Print, serde_json::json!({"badge": "A"}), EnqueueOptions::default())
            .await?
            .unwrap();

        let status = q.status(&id).await?;
        assert_eq!(status.state, crate::ReportedState::Waiting);
        assert_eq!(status.attempts_made, 0);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_id_reports_not_found() {
        let store = DeterministicKeyValueStore::new();
        let q = queue(store);
        let status = q.status("nope").await.unwrap();
        assert_eq!(status.state, crate::ReportedState::NotFound);
    }

    #[tokio::test]
    async fn claim_follows_fifo_order() -> anyhow::Result<()> {
        let store = DeterministicKeyValueStore::new();
        let q = queue(store);

        let mut ids = Vec::new();
        for i in 0..3 {
            let id = q
                .enqueue(JobKind::Message, serde_json::json!({ "n": i }), EnqueueOptions::default())
                .await?
                .unwrap();
            ids.push(id);
        }

        for expected in &ids {
            let claimed = q.claim_next(JobKind::Message).await?.unwrap();
            assert_eq!(&claimed.record.id, expected);
            q.complete(&claimed, serde_json::json!({})).await?;
        }
        assert!(q.claim_next(JobKind::Message).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn kinds_are_isolated() {
        let store = DeterministicKeyValueStore::new();
        let q = queue(store);

        q.enqueue(JobKind::Print, serde_json::json!({}), EnqueueOptions::default())
            .await
            .unwrap();
        assert!(q.claim_next(JobKind::Otp).await.unwrap().is_none());
        assert!(q.claim_next(JobKind::Print).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn concurrent_claims_take_distinct_jobs() {
        let store = DeterministicKeyValueStore::new();
        let q = Arc::new(queue(store));

        for _ in 0..4 {
            q.enqueue(JobKind::Print, serde_json::json!({}), EnqueueOptions::default())
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let q = q.clone();
            handles.push(tokio::spawn(async move {
                q.claim_next(JobKind::Print).await.unwrap().map(|c| c.record.id)
            }));
        }

        let mut claimed_ids = Vec::new();
        for handle in handles {
            if let Some(id) = handle.await.unwrap() {
                claimed_ids.push(id);
            }
        }
        claimed_ids.sort();
        claimed_ids.dedup();
        assert_eq!(claimed_ids.len(), 4, "each claim must take a distinct job");
    }

    #[tokio::test]
    async fn completed_snapshot_is_stable() {
        let store = DeterministicKeyValueStore::new();
        let q = queue(store);

        let id = q
            .enqueue(JobKind::Print, serde_json::json!({}), EnqueueOptions::default())
            .await
            .unwrap()
            .unwrap();
        let claimed = q.claim_next(JobKind::Print).await.unwrap().unwrap();
        q.complete(&claimed, serde_json::json!({"ok": true})).await.unwrap();

        let first = q.status(&id).await.unwrap();
        assert_eq!(first.state, crate::ReportedState::Completed);
        assert_eq!(first.progress, 100);
        assert_eq!(first.result, Some(serde_json::json!({"ok": true})));
        // Repeated reads return the same terminal snapshot.
        assert_eq!(q.status(&id).await.unwrap(), first);
        assert_eq!(q.status(&id).await.unwrap(), first);
    }

    #[tokio::test]
    async fn failure_delays_then_fails_terminally_after_max_attempts() {
        let store = DeterministicKeyValueStore::new();
        let q = JobQueue::new(store, fast_retry_config());

        let id = q
            .enqueue(JobKind::Otp, serde_json::json!({}), EnqueueOptions::default())
            .await
            .unwrap()
            .unwrap();

        for attempt in 1..=3u32 {
            // Promote any due delayed job from the previous failure.
            if attempt > 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
                assert_eq!(q.promote_due(JobKind::Otp).await.unwrap(), 1);
            }
            let claimed = q.claim_next(JobKind::Otp).await.unwrap().unwrap();
            assert_eq!(claimed.record.attempts_made, attempt);
            let state = q.record_failure(&claimed, "provider timeout").await.unwrap();
            if attempt < 3 {
                assert_eq!(state, JobState::Delayed);
            } else {
                assert_eq!(state, JobState::Failed);
            }
        }

        // A fourth attempt never occurs.
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(q.promote_due(JobKind::Otp).await.unwrap(), 0);
        assert!(q.claim_next(JobKind::Otp).await.unwrap().is_none());

        let status = q.status(&id).await.unwrap();
        assert_eq!(status.state, crate::ReportedState::Failed);
        assert_eq!(status.attempts_made, 3);
        assert_eq!(status.error.as_deref(), Some("provider timeout"));
    }

    #[tokio::test]
    async fn delayed_job_is_not_claimable_before_deadline() {
        let store = DeterministicKeyValueStore::new();
        let mut config = JobQueueConfig::default();
        for policy in config.policies.values_mut() {
            policy.initial_backoff = Duration::from_secs(3600);
        }
        let q = JobQueue::new(store, config);

        q.enqueue(JobKind::Print, serde_json::json!({}), EnqueueOptions::default())
            .await
            .unwrap();
        let claimed = q.claim_next(JobKind::Print).await.unwrap().unwrap();
        q.record_failure(&claimed, "spooler busy").await.unwrap();

        assert_eq!(q.promote_due(JobKind::Print).await.unwrap(), 0);
        assert!(q.claim_next(JobKind::Print).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retry_job_requires_failed_state() {
        let store = DeterministicKeyValueStore::new();
        let q = queue(store);

        let id = q
            .enqueue(JobKind::Print, serde_json::json!({}), EnqueueOptions::default())
            .await
            .unwrap()
            .unwrap();
        let err = q.retry_job(&id).await.unwrap_err();
        assert!(matches!(err, JobError::InvalidJobState { .. }));

        let err = q.retry_job("missing").await.unwrap_err();
        assert!(matches!(err, JobError::JobNotFound { .. }));
    }

    #[tokio::test]
    async fn retry_job_requeues_with_fresh_attempts() {
        let store = DeterministicKeyValueStore::new();
        let q = JobQueue::new(store, fast_retry_config());

        let id = q
            .enqueue(
                JobKind::Print,
                serde_json::json!({}),
                EnqueueOptions {
                    max_attempts: Some(1),
                    ..EnqueueOptions::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        let claimed = q.claim_next(JobKind::Print).await.unwrap().unwrap();
        let state = q.record_failure(&claimed, "printer offline").await.unwrap();
        assert_eq!(state, JobState::Failed);

        q.retry_job(&id).await.unwrap();
        let claimed = q.claim_next(JobKind::Print).await.unwrap().unwrap();
        assert_eq!(claimed.record.id, id);
        assert_eq!(claimed.record.attempts_made, 1);
        assert!(claimed.record.error.is_none());
    }

    #[tokio::test]
    async fn clean_queue_prunes_old_completed_only() {
        let store = DeterministicKeyValueStore::new();
        let q = queue(store);

        let done = q
            .enqueue(JobKind::Message, serde_json::json!({}), EnqueueOptions::default())
            .await
            .unwrap()
            .unwrap();
        let claimed = q.claim_next(JobKind::Message).await.unwrap().unwrap();
        q.complete(&claimed, serde_json::json!({})).await.unwrap();

        let pending = q
            .enqueue(JobKind::Message, serde_json::json!({}), EnqueueOptions::default())
            .await
            .unwrap()
            .unwrap();

        // Zero grace prunes everything completed.
        tokio::time::sleep(Duration::from_millis(2)).await;
        let removed = q.clean_queue(JobKind::Message, Duration::from_millis(0)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(q.status(&done).await.unwrap().state, crate::ReportedState::NotFound);
        assert_eq!(q.status(&pending).await.unwrap().state, crate::ReportedState::Waiting);
    }

    #[tokio::test]
    async fn stats_track_states() {
        let store = DeterministicKeyValueStore::new();
        let q = JobQueue::new(store, fast_retry_config());

        for _ in 0..3 {
            q.enqueue(JobKind::Print, serde_json::json!({}), EnqueueOptions::default())
                .await
                .unwrap();
        }
        let claimed = q.claim_next(JobKind::Print).await.unwrap().unwrap();
        q.complete(&claimed, serde_json::json!({})).await.unwrap();
        let claimed = q.claim_next(JobKind::Print).await.unwrap().unwrap();
        q.record_failure(&claimed, "x").await.unwrap();

        let stats = q.stats(JobKind::Print).await.unwrap();
        assert_eq!(stats.waiting, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.delayed, 1);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn list_by_correlation_filters_by_state() {
        let store = DeterministicKeyValueStore::new();
        let q = queue(store);

        for _ in 0..2 {
            q.enqueue(
                JobKind::Print,
                serde_json::json!({}),
                EnqueueOptions {
                    correlation_id: Some("expo-42".to_string()),
                    ..EnqueueOptions::default()
                },
            )
            .await
            .unwrap();
        }
        q.enqueue(JobKind::Print, serde_json::json!({}), EnqueueOptions::default())
            .await
            .unwrap();

        let all = q.list_by_correlation("expo-42", None, 10).await.unwrap();
        assert_eq!(all.len(), 2);

        let claimed = q.claim_next(JobKind::Print).await.unwrap().unwrap();
        q.complete(&claimed, serde_json::json!({})).await.unwrap();

        let completed = q
            .list_by_correlation("expo-42", Some(JobState::Completed), 10)
            .await
            .unwrap();
        let waiting = q
            .list_by_correlation("expo-42", Some(JobState::Waiting), 10)
            .await
            .unwrap();
        // The first-claimed job belonged to the correlation group.
        assert_eq!(completed.len() + waiting.len(), 2);
    }

    #[tokio::test]
    async fn remove_job_deletes_record_and_claim_path() {
        let store = DeterministicKeyValueStore::new();
        let q = queue(store);

        let id = q
            .enqueue(JobKind::Print, serde_json::json!({}), EnqueueOptions::default())
            .await
            .unwrap()
            .unwrap();
        q.remove_job(&id).await.unwrap();

        assert_eq!(q.status(&id).await.unwrap().state, crate::ReportedState::NotFound);
        assert!(q.claim_next(JobKind::Print).await.unwrap().is_none());
        assert!(matches!(q.remove_job(&id).await, Err(JobError::JobNotFound { .. })));
    }

    #[tokio::test]
    async fn best_effort_enqueue_swallows_storage_failure() {
        use lanyard_core::test_support::UnreachableKeyValueStore;
        let q = JobQueue::new(UnreachableKeyValueStore::new(), JobQueueConfig::default());

        let outcome = q
            .enqueue(JobKind::Print, serde_json::json!({}), EnqueueOptions::default())
            .await
            .unwrap();
        assert!(outcome.is_none());

        // The critical kind propagates the failure.
        let err = q
            .enqueue(JobKind::Otp, serde_json::json!({}), EnqueueOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Storage { .. }));
    }
}
