//! Fixed limits and default durations shared across the workspace.

/// Maximum key size in bytes.
pub const MAX_KEY_SIZE: u32 = 1024;

/// Maximum value size in bytes (256 KiB).
pub const MAX_VALUE_SIZE: u32 = 256 * 1024;

/// Default lock TTL in milliseconds.
pub const DEFAULT_LOCK_TTL_MS: u64 = 5_000;

/// TTL for the per-phone-number OTP dispatch mutex.
pub const OTP_SEND_LOCK_TTL_MS: u64 = 10_000;

/// TTL for the per-registration-number check-in mutex.
pub const CHECKIN_LOCK_TTL_MS: u64 = 10_000;

/// Maximum attempts for a compare-and-swap retry loop before giving up.
pub const MAX_CAS_RETRIES: u32 = 64;

/// Initial backoff between CAS retries in milliseconds.
pub const CAS_RETRY_INITIAL_BACKOFF_MS: u64 = 1;

/// Maximum backoff between CAS retries in milliseconds.
pub const CAS_RETRY_MAX_BACKOFF_MS: u64 = 50;

/// Default scan page size when the caller supplies no limit.
pub const DEFAULT_SCAN_LIMIT: u32 = 1_000;
