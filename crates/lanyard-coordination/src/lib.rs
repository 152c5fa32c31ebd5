//! Distributed coordination primitives for the registration platform.
//!
//! Two primitives live here, both built on the atomic conditional
//! commands of [`lanyard_core::KeyValueStore`]:
//!
//! - [`DistributedLock`] - try-once mutual exclusion with TTL expiry,
//!   used to serialize per-phone OTP dispatch and per-registration
//!   check-in across kiosks and backend instances.
//! - [`SequenceGenerator`] - strictly increasing, gap-free registration
//!   numbers scoped by (namespace, calendar day).
//!
//! ## Lock example
//!
//! ```ignore
//! use lanyard_coordination::{DistributedLock, LockOutcome};
//!
//! let lock = DistributedLock::new(store, LockConfig::default());
//! match lock.with_lock("checkin-lock:REG-ABSE-01122025-000001", ttl, || async {
//!     check_in(&registration).await
//! }).await? {
//!     LockOutcome::Completed(result) => { /* exactly one kiosk gets here */ }
//!     LockOutcome::Busy => { /* surface "already in progress" */ }
//! }
//! ```

#![warn(missing_docs)]

mod error;
mod lock;
mod sequence;
mod types;

pub use error::CoordinationError;
pub use lock::DistributedLock;
pub use lock::LockConfig;
pub use lock::LockHolder;
pub use lock::LockOutcome;
pub use sequence::SequenceConfig;
pub use sequence::SequenceGenerator;
pub use types::LockEntry;
pub use types::SequenceCounter;
