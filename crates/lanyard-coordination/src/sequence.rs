//! Gap-free registration-number generator.
//!
//! Issues strictly increasing, contiguous sequence values scoped by
//! (namespace, calendar day), formatted as
//! `REG-{NAMESPACE}-{DDMMYYYY}-{seq:06}`. Counters are created lazily on
//! first issuance for a bucket and never deleted, and the date bucket in
//! the key means counters silently restart at 1 each day with no
//! explicit rollover logic.
//!
//! The increment is a CAS loop: the creating arm is a single
//! `CompareAndSwap { expected: None }` (an atomic create-at-1), so two
//! callers racing on a brand-new bucket are arbitrated entirely inside
//! the store - one creates, the other observes the fresh value and
//! retries. No existence check ever precedes an insert, and no
//! uniqueness violation can surface to the caller.

use std::sync::Arc;
use std::time::Duration;

use chrono::FixedOffset;
use chrono::Utc;
use lanyard_core::KeyValueStore;
use lanyard_core::KeyValueStoreError;
use lanyard_core::ReadRequest;
use lanyard_core::WriteRequest;
use lanyard_core::constants::CAS_RETRY_INITIAL_BACKOFF_MS;
use lanyard_core::constants::CAS_RETRY_MAX_BACKOFF_MS;
use lanyard_core::constants::MAX_CAS_RETRIES;
use tracing::debug;

use crate::error::CoordinationError;
use crate::types::SequenceCounter;

/// Key prefix for counter documents.
const SEQUENCE_PREFIX: &str = "__seq:";

/// Configuration for [`SequenceGenerator`].
#[derive(Debug, Clone)]
pub struct SequenceConfig {
    /// Identifier prefix, e.g. `REG`.
    pub prefix: String,
    /// Timezone offset used to derive the calendar-day bucket.
    pub timezone: FixedOffset,
    /// Zero-padded width of the sequence component.
    pub pad_width: usize,
    /// CAS attempts before giving up under pathological contention.
    pub max_cas_retries: u32,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            prefix: "REG".to_string(),
            timezone: FixedOffset::east_opt(0).expect("zero offset is valid"),
            pad_width: 6,
            max_cas_retries: MAX_CAS_RETRIES,
        }
    }
}

/// Distributed gap-free sequence generator.
pub struct SequenceGenerator<S: KeyValueStore + ?Sized> {
    store: Arc<S>,
    config: SequenceConfig,
}

impl<S: KeyValueStore + ?Sized> SequenceGenerator<S> {
    /// Create a new generator over the shared store.
    pub fn new(store: Arc<S>, config: SequenceConfig) -> Self {
        Self { store, config }
    }

    /// Issue the next identifier for `namespace` in today's bucket.
    pub async fn next(&self, namespace: &str) -> Result<String, CoordinationError> {
        let bucket = self.today_bucket();
        self.next_for_bucket(namespace, &bucket).await
    }

    /// Issue the next identifier for an explicit date bucket.
    ///
    /// Exposed for backfills and tests; `next` is the everyday entry
    /// point.
    pub async fn next_for_bucket(&self, namespace: &str, date_bucket: &str) -> Result<String, CoordinationError> {
        let namespace = sanitize_namespace(namespace)?;
        let key = counter_key(&namespace, date_bucket);

        let mut backoff_ms = CAS_RETRY_INITIAL_BACKOFF_MS;
        for attempt in 0..self.config.max_cas_retries {
            let current = self.read_counter(&key).await?;
            let (expected, sequence) = match &current {
                None => (None, 1),
                Some(counter) => (Some(serde_json::to_string(counter)?), counter.sequence + 1),
            };

            let formatted = format_id(&self.config.prefix, &namespace, date_bucket, sequence, self.config.pad_width);
            let next = SequenceCounter {
                namespace: namespace.clone(),
                date_bucket: date_bucket.to_string(),
                sequence,
                last_issued: formatted.clone(),
            };
            let new_value = serde_json::to_string(&next)?;

            match self
                .store
                .write(WriteRequest::compare_and_swap(&key, expected, new_value))
                .await
            {
                Ok(_) => {
                    debug!(namespace = %namespace, date_bucket, sequence, "sequence issued");
                    return Ok(formatted);
                }
                Err(KeyValueStoreError::CompareAndSwapFailed { .. }) => {
                    // Lost the race; re-read and retry.
                    if attempt + 1 < self.config.max_cas_retries {
                        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                        backoff_ms = (backoff_ms * 2).min(CAS_RETRY_MAX_BACKOFF_MS);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CoordinationError::MaxRetriesExceeded {
            operation: format!("sequence next for {namespace}:{date_bucket}"),
            attempts: self.config.max_cas_retries,
        })
    }

    /// Last issued counter state for a bucket, if any.
    pub async fn current(&self, namespace: &str, date_bucket: &str) -> Result<Option<SequenceCounter>, CoordinationError> {
        let namespace = sanitize_namespace(namespace)?;
        self.read_counter(&counter_key(&namespace, date_bucket)).await
    }

    /// Today's bucket (DDMMYYYY) in the configured timezone.
    pub fn today_bucket(&self) -> String {
        Utc::now().with_timezone(&self.config.timezone).format("%d%m%Y").to_string()
    }

    async fn read_counter(&self, key: &str) -> Result<Option<SequenceCounter>, CoordinationError> {
        let read = self.store.read(ReadRequest::new(key)).await?;
        match read.kv {
            None => Ok(None),
            Some(kv) => serde_json::from_str(&kv.value)
                .map(Some)
                .map_err(|e| CoordinationError::CorruptedData {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
        }
    }
}

/// Uppercase and strip to alphanumeric; empty results are rejected.
fn sanitize_namespace(namespace: &str) -> Result<String, CoordinationError> {
    let sanitized: String = namespace
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if sanitized.is_empty() {
        return Err(CoordinationError::InvalidNamespace {
            namespace: namespace.to_string(),
        });
    }
    Ok(sanitized)
}

fn counter_key(namespace: &str, date_bucket: &str) -> String {
    format!("{SEQUENCE_PREFIX}{namespace}:{date_bucket}")
}

fn format_id(prefix: &str, namespace: &str, date_bucket: &str, sequence: u64, pad_width: usize) -> String {
    format!("{prefix}-{namespace}-{date_bucket}-{sequence:0pad_width$}")
}
