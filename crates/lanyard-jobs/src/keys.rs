//! Storage key helpers for the job queue.
//!
//! The waiting index embeds a zero-padded enqueue sequence so that an
//! ascending key scan yields FIFO order.

use crate::job::JobKind;
use crate::job::JobState;

/// Record key: `__jobs:job:{id}`.
pub fn job_key(id: &str) -> String {
    format!("__jobs:job:{id}")
}

/// Per-kind enqueue sequence counter key.
pub fn enqueue_seq_key(kind: JobKind) -> String {
    format!("__jobs:q:{}:seq", kind.queue_name())
}

/// FIFO waiting-index entry key.
pub fn waiting_key(kind: JobKind, seq: u64) -> String {
    format!("{}{seq:020}", waiting_prefix(kind))
}

/// Prefix scanned to claim in FIFO order.
pub fn waiting_prefix(kind: JobKind) -> String {
    format!("__jobs:q:{}:waiting:", kind.queue_name())
}

/// State-index entry key.
pub fn state_key(kind: JobKind, state: JobState, id: &str) -> String {
    format!("{}{id}", state_prefix(kind, state))
}

/// Prefix scanned for per-state counts and sweeps.
pub fn state_prefix(kind: JobKind, state: JobState) -> String {
    format!("__jobs:state:{}:{}:", state.as_str(), kind.queue_name())
}

/// Correlation-index entry key.
pub fn correlation_key(correlation_id: &str, id: &str) -> String {
    format!("{}{id}", correlation_prefix(correlation_id))
}

/// Prefix scanned by `list_by_correlation`.
pub fn correlation_prefix(correlation_id: &str) -> String {
    format!("__jobs:corr:{correlation_id}:")
}
