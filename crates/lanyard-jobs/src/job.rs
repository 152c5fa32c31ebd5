//! Job model: kinds, states, records, and status snapshots.

use serde::Deserialize;
use serde::Serialize;

/// The three job kinds the platform offloads to workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    /// Badge print job.
    Print,
    /// One-time-password delivery.
    Otp,
    /// Outbound message delivery (e.g. registration confirmations).
    Message,
}

impl JobKind {
    /// Stable queue name used in storage keys.
    pub fn queue_name(&self) -> &'static str {
        match self {
            Self::Print => "print",
            Self::Otp => "otp",
            Self::Message => "message",
        }
    }

    /// Whether an enqueue failure must propagate to the caller.
    ///
    /// OTP delivery is on the critical path of login; print and message
    /// notifications are best-effort and must never fail the primary
    /// transaction that enqueued them.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Otp)
    }

    /// All kinds, for iteration by the pool's maintenance tasks.
    pub fn all() -> [JobKind; 3] {
        [Self::Print, Self::Otp, Self::Message]
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.queue_name())
    }
}

/// Lifecycle state of a stored job.
///
/// Transitions are monotonic: `Waiting -> Active`, then `Completed`,
/// or `Delayed -> Waiting` around each retry, or terminal `Failed` once
/// attempts are exhausted. Nothing ever leaves `Completed`; `Failed`
/// leaves only via explicit admin retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// Eligible for claiming, FIFO by enqueue order.
    Waiting,
    /// Claimed by a worker and being processed.
    Active,
    /// Failed an attempt; parked until its backoff deadline.
    Delayed,
    /// Handler returned successfully. Terminal.
    Completed,
    /// Attempts exhausted. Terminal except for admin retry.
    Failed,
}

impl JobState {
    /// Stable name used in storage keys and status reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Delayed => "delayed",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored representation of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobRecord {
    /// Unique job id.
    pub id: String,
    /// Which queue this job belongs to.
    pub kind: JobKind,
    /// Opaque JSON payload handed to the handler.
    pub payload: serde_json::Value,
    /// Current lifecycle state.
    pub state: JobState,
    /// Attempts started so far (incremented on claim).
    pub attempts_made: u32,
    /// Attempts allowed before terminal failure.
    pub max_attempts: u32,
    /// Enqueue time (Unix ms).
    pub created_at_ms: u64,
    /// FIFO position within the kind's waiting queue.
    pub waiting_seq: u64,
    /// Optional parent-entity id for grouping (e.g. an exhibition id).
    pub correlation_id: Option<String>,
    /// Completion percentage (100 once completed).
    pub progress: u8,
    /// Handler result, present once completed.
    pub result: Option<serde_json::Value>,
    /// Last failure message, present after a failed attempt.
    pub error: Option<String>,
    /// Backoff deadline while `Delayed` (Unix ms).
    pub next_attempt_at_ms: Option<u64>,
    /// Terminal-transition time (Unix ms).
    pub finished_at_ms: Option<u64>,
}

/// Options accepted by `enqueue`.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Parent-entity id for `list_by_correlation`.
    pub correlation_id: Option<String>,
    /// Override the kind's default max attempts.
    pub max_attempts: Option<u32>,
}

/// State reported by status queries.
///
/// Extends [`JobState`] with `NotFound`, returned once retention pruning
/// has removed the record. `NotFound` is a normal answer, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportedState {
    /// Eligible for claiming.
    Waiting,
    /// Being processed.
    Active,
    /// Parked until its backoff deadline.
    Delayed,
    /// Finished successfully.
    Completed,
    /// Attempts exhausted.
    Failed,
    /// Pruned by retention (or never existed).
    NotFound,
}

impl From<JobState> for ReportedState {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Waiting => Self::Waiting,
            JobState::Active => Self::Active,
            JobState::Delayed => Self::Delayed,
            JobState::Completed => Self::Completed,
            JobState::Failed => Self::Failed,
        }
    }
}

/// Point-in-time status snapshot of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobStatusReport {
    /// Reported lifecycle state.
    pub state: ReportedState,
    /// Completion percentage.
    pub progress: u8,
    /// Attempts started so far.
    pub attempts_made: u32,
    /// Handler result, if completed.
    pub result: Option<serde_json::Value>,
    /// Last failure message, if any.
    pub error: Option<String>,
    /// Enqueue time (Unix ms); 0 when not found.
    pub enqueued_at_ms: u64,
}

impl JobStatusReport {
    /// The snapshot returned for pruned or unknown job ids.
    pub fn not_found() -> Self {
        Self {
            state: ReportedState::NotFound,
            progress: 0,
            attempts_made: 0,
            result: None,
            error: None,
            enqueued_at_ms: 0,
        }
    }
}

impl From<&JobRecord> for JobStatusReport {
    fn from(record: &JobRecord) -> Self {
        Self {
            state: record.state.into(),
            progress: record.progress,
            attempts_made: record.attempts_made,
            result: record.result.clone(),
            error: record.error.clone(),
            enqueued_at_ms: record.created_at_ms,
        }
    }
}

/// Approximate per-state counts for one kind's queue.
///
/// Computed from state-index scans; counts can lag record transitions by
/// one write under concurrency.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStats {
    /// Jobs eligible for claiming.
    pub waiting: u64,
    /// Jobs being processed.
    pub active: u64,
    /// Jobs parked for backoff.
    pub delayed: u64,
    /// Jobs finished successfully (within retention).
    pub completed: u64,
    /// Jobs terminally failed (within retention).
    pub failed: u64,
}
