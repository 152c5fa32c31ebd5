//! Durable, at-least-once job queue for the registration platform.
//!
//! Three job kinds share one abstraction: badge printing, OTP delivery,
//! and message delivery. Registration and check-in enqueue jobs and move
//! on; worker processes claim jobs, run their handlers, and drive the
//! retry/backoff cycle. A job that exhausts its attempts lands in a
//! terminal `Failed` state and is retained for operator inspection and
//! manual retry - it never rolls back the business operation that
//! enqueued it.
//!
//! Delivery is at-least-once: a handler that performed its side effect
//! but failed before acknowledging will run again. Handlers must be
//! written with that in mind; the queue does not deduplicate side
//! effects.
//!
//! ```ignore
//! use lanyard_jobs::{JobQueue, JobKind, Worker, WorkerPool};
//!
//! struct PrintWorker;
//!
//! #[async_trait]
//! impl Worker for PrintWorker {
//!     async fn process(&self, job: &JobRecord) -> Result<serde_json::Value, JobError> {
//!         // render and spool the badge...
//!         Ok(serde_json::json!({ "printed": true }))
//!     }
//! }
//!
//! let queue = Arc::new(JobQueue::new(store, JobQueueConfig::default()));
//! let job_id = queue.enqueue(JobKind::Print, payload, EnqueueOptions::default()).await?;
//!
//! let pool = WorkerPool::new(queue.clone(), WorkerPoolConfig::default())
//!     .register(JobKind::Print, Arc::new(PrintWorker))
//!     .start();
//! // ...
//! pool.shutdown().await;
//! ```

#![warn(missing_docs)]

mod error;
mod job;
mod keys;
mod policy;
mod queue;
mod worker;

pub use error::JobError;
pub use job::EnqueueOptions;
pub use job::JobKind;
pub use job::JobRecord;
pub use job::JobState;
pub use job::JobStatusReport;
pub use job::QueueStats;
pub use job::ReportedState;
pub use policy::KindPolicy;
pub use queue::ClaimedJob;
pub use queue::JobQueue;
pub use queue::JobQueueConfig;
pub use worker::PoolHandle;
pub use worker::Worker;
pub use worker::WorkerPool;
pub use worker::WorkerPoolConfig;
