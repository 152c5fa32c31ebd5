//! Worker pool: per-kind claim loops plus maintenance tasks.
//!
//! Handlers are invoked at-least-once: a worker that crashes between
//! claiming and completing leaves the job `Active`, so handlers must be
//! idempotent against redelivery.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lanyard_core::KeyValueStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::error::JobError;
use crate::job::JobKind;
use crate::job::JobRecord;
use crate::queue::JobQueue;

/// Handler for one job kind.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Process one job. The returned value is stored as the job's
    /// result; an error schedules a retry (or terminal failure).
    async fn process(&self, job: &JobRecord) -> Result<serde_json::Value, JobError>;
}

/// Tuning for [`WorkerPool`] background tasks.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// How long an idle claim loop sleeps before polling again.
    pub poll_interval: Duration,
    /// How often delayed jobs are checked for promotion.
    pub promote_interval: Duration,
    /// How often retention is applied.
    pub sweep_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            promote_interval: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// A pool of background tasks driving the queue.
///
/// One claim loop per registered kind, one promoter moving due delayed
/// jobs back to waiting, one sweeper applying retention.
pub struct WorkerPool<S: KeyValueStore + ?Sized> {
    queue: Arc<JobQueue<S>>,
    workers: HashMap<JobKind, Arc<dyn Worker>>,
    config: WorkerPoolConfig,
}

impl<S: KeyValueStore + ?Sized + 'static> WorkerPool<S> {
    /// Create an empty pool over a queue.
    pub fn new(queue: Arc<JobQueue<S>>, config: WorkerPoolConfig) -> Self {
        Self {
            queue,
            workers: HashMap::new(),
            config,
        }
    }

    /// Register the handler for a kind, replacing any previous one.
    pub fn register(mut self, kind: JobKind, worker: Arc<dyn Worker>) -> Self {
        self.workers.insert(kind, worker);
        self
    }

    /// Spawn the background tasks and return a handle for shutdown.
    pub fn start(self) -> PoolHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        let kinds: Vec<JobKind> = self.workers.keys().copied().collect();
        for (kind, worker) in self.workers {
            let queue = self.queue.clone();
            let mut shutdown = shutdown_rx.clone();
            let poll_interval = self.config.poll_interval;
            tasks.push(tokio::spawn(async move {
                claim_loop(queue, kind, worker, poll_interval, &mut shutdown).await;
            }));
        }

        {
            let queue = self.queue.clone();
            let kinds = kinds.clone();
            let mut shutdown = shutdown_rx.clone();
            let interval = self.config.promote_interval;
            tasks.push(tokio::spawn(async move {
                maintenance_loop("promote", interval, &mut shutdown, move || {
                    let queue = queue.clone();
                    let kinds = kinds.clone();
                    async move {
                        for kind in kinds {
                            if let Err(e) = queue.promote_due(kind).await {
                                warn!(%kind, error = %e, "promoting delayed jobs failed");
                            }
                        }
                    }
                })
                .await;
            }));
        }

        {
            let queue = self.queue.clone();
            let mut shutdown = shutdown_rx;
            let interval = self.config.sweep_interval;
            tasks.push(tokio::spawn(async move {
                maintenance_loop("sweep", interval, &mut shutdown, move || {
                    let queue = queue.clone();
                    let kinds = kinds.clone();
                    async move {
                        for kind in kinds {
                            if let Err(e) = queue.sweep_retention(kind).await {
                                warn!(%kind, error = %e, "retention sweep failed");
                            }
                        }
                    }
                })
                .await;
            }));
        }

        info!(tasks = tasks.len(), "worker pool started");
        PoolHandle { shutdown_tx, tasks }
    }
}

/// Handle to a running pool.
pub struct PoolHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl PoolHandle {
    /// Signal all tasks to stop and wait for them to finish.
    ///
    /// In-flight handler invocations run to completion; no new jobs are
    /// claimed after the signal.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "worker task panicked");
            }
        }
        info!("worker pool stopped");
    }
}

async fn claim_loop<S: KeyValueStore + ?Sized>(
    queue: Arc<JobQueue<S>>,
    kind: JobKind,
    worker: Arc<dyn Worker>,
    poll_interval: Duration,
    shutdown: &mut watch::Receiver<bool>,
) {
    debug!(%kind, "claim loop started");
    loop {
        if *shutdown.borrow() {
            break;
        }

        match queue.claim_next(kind).await {
            Ok(Some(claimed)) => {
                match worker.process(&claimed.record).await {
                    Ok(result) => {
                        if let Err(e) = queue.complete(&claimed, result).await {
                            warn!(%kind, job_id = %claimed.record.id, error = %e, "recording completion failed");
                        }
                    }
                    Err(handler_err) => {
                        let reason = handler_err.to_string();
                        if let Err(e) = queue.record_failure(&claimed, &reason).await {
                            warn!(%kind, job_id = %claimed.record.id, error = %e, "recording failure failed");
                        }
                    }
                }
                // Drain the queue without sleeping between jobs.
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(%kind, error = %e, "claim attempt failed");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = shutdown.changed() => {}
        }
    }
    debug!(%kind, "claim loop stopped");
}

async fn maintenance_loop<F, Fut>(
    name: &'static str,
    interval: Duration,
    shutdown: &mut watch::Receiver<bool>,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {}
        }
        if *shutdown.borrow() {
            break;
        }
        tick().await;
    }
    debug!(task = name, "maintenance loop stopped");
}
