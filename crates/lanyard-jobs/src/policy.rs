//! Per-kind retry and retention policy.

use std::time::Duration;

use crate::job::JobKind;

/// Retry/backoff and retention policy for one job kind.
#[derive(Debug, Clone)]
pub struct KindPolicy {
    /// Attempts allowed before terminal failure.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Multiplier applied per subsequent retry.
    pub backoff_factor: f64,
    /// Upper bound on any single backoff delay.
    pub max_backoff: Duration,
    /// Whether to spread retries with a random multiplier in [1.0, 1.5).
    pub randomize_backoff: bool,
    /// Age after which completed jobs are pruned.
    pub completed_retention: Duration,
    /// Completed-job count cap; oldest are pruned beyond it.
    pub completed_max_count: u32,
    /// Age after which failed jobs are pruned (longer, for diagnosis).
    pub failed_retention: Duration,
}

impl KindPolicy {
    /// Platform default policy for a kind.
    ///
    /// OTP delivery retries sooner (2 s) and keeps failures longer
    /// (14 days) than the best-effort print/message kinds (5 s, 7 days).
    pub fn for_kind(kind: JobKind) -> Self {
        let base = Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(5),
            backoff_factor: 2.0,
            max_backoff: Duration::from_secs(300),
            randomize_backoff: false,
            completed_retention: Duration::from_secs(24 * 60 * 60),
            completed_max_count: 1_000,
            failed_retention: Duration::from_secs(7 * 24 * 60 * 60),
        };
        match kind {
            JobKind::Print | JobKind::Message => base,
            JobKind::Otp => Self {
                initial_backoff: Duration::from_secs(2),
                failed_retention: Duration::from_secs(14 * 24 * 60 * 60),
                ..base
            },
        }
    }

    /// Backoff delay for failed attempt `attempts_made` (1-based).
    ///
    /// No exhaustion check here: jobs may carry a per-job `max_attempts`
    /// override, so the queue decides exhaustion against the record
    /// before asking for a delay.
    pub fn backoff_delay(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1);
        let mut delay_ms =
            self.initial_backoff.as_millis() as f64 * self.backoff_factor.powi(exponent as i32);
        if self.randomize_backoff {
            delay_ms *= 1.0 + rand::random::<f64>() * 0.5;
        }
        let capped = delay_ms.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped.round() as u64)
    }
}
