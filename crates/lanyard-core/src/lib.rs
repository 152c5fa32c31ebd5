//! Shared key-value substrate for lanyard's coordination components.
//!
//! Every lanyard primitive (locks, sequences, job queue, token rotation)
//! coordinates through a store implementing [`KeyValueStore`]. The trait
//! deliberately exposes only atomic conditional commands: plain
//! read-modify-write is not race-safe when multiple service instances
//! share the store, so callers express their intent as
//! compare-and-swap / set-if-absent operations and let the store
//! arbitrate.
//!
//! The production store lives outside this repository (it is an external
//! collaborator); [`test_support`] provides a deterministic in-memory
//! implementation for tests.

#![warn(missing_docs)]

mod clock;
pub mod constants;
mod error;
mod kv;
pub mod test_support;
mod traits;

pub use clock::now_unix_ms;
pub use error::KeyValueStoreError;
pub use kv::DeleteRequest;
pub use kv::DeleteResult;
pub use kv::KeyValueWithRevision;
pub use kv::ReadRequest;
pub use kv::ReadResult;
pub use kv::ScanRequest;
pub use kv::ScanResult;
pub use kv::WriteCommand;
pub use kv::WriteRequest;
pub use kv::WriteResult;
pub use kv::validate_write_command;
pub use traits::KeyValueStore;
