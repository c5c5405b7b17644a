//! Concurrent consumers for one named queue.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument};

use crate::services::queue::{Delivery, JobFailure, JobQueue, QueueError, QueueName};

/// Processes one delivery of a queue.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, delivery: &Delivery) -> Result<serde_json::Value, JobFailure>;
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Jobs processed in parallel.
    pub concurrency: usize,
    /// Sleep between polls of an empty queue.
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_millis(1000),
        }
    }
}

/// What happened to a delivery after its handler ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Completed,
    Retried,
    Failed,
}

pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    queue_name: QueueName,
    handler: Arc<dyn JobHandler>,
    config: WorkerPoolConfig,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        queue_name: QueueName,
        handler: Arc<dyn JobHandler>,
        config: WorkerPoolConfig,
    ) -> Self {
        Self {
            queue,
            queue_name,
            handler,
            config,
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
        }
    }

    pub fn queue_name(&self) -> QueueName {
        self.queue_name
    }

    pub fn jobs_completed(&self) -> u64 {
        self.jobs_completed.load(Ordering::Relaxed)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    /// Take one job, run it to completion and settle it with the broker.
    ///
    /// The handler is never cancelled from here; handlers bound their own
    /// work so their failure bookkeeping always runs. Returns `Ok(None)` when
    /// the queue was empty.
    pub async fn process_one(&self) -> Result<Option<Disposition>, QueueError> {
        let Some(delivery) = self.queue.dequeue(self.queue_name).await? else {
            return Ok(None);
        };

        debug!(
            queue = %self.queue_name,
            job_id = %delivery.id,
            attempt = delivery.attempt,
            "Processing job"
        );

        let result = self.handler.handle(&delivery).await;

        let queue_label = self.queue_name.to_string();
        let disposition = match result {
            Ok(value) => {
                self.queue.complete(&delivery, &value).await?;
                self.jobs_completed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("jobs_completed_total", "queue" => queue_label).increment(1);
                debug!(queue = %self.queue_name, job_id = %delivery.id, "Job completed");
                Disposition::Completed
            }
            Err(failure) if failure.retryable && !delivery.is_final_attempt() => {
                warn!(
                    queue = %self.queue_name,
                    job_id = %delivery.id,
                    attempt = delivery.attempt,
                    code = %failure.code,
                    "Job failed, scheduling retry"
                );
                self.queue.retry(&delivery, &failure.to_string()).await?;
                metrics::counter!("jobs_retried_total", "queue" => queue_label).increment(1);
                Disposition::Retried
            }
            Err(failure) => {
                error!(
                    queue = %self.queue_name,
                    job_id = %delivery.id,
                    attempt = delivery.attempt,
                    code = %failure.code,
                    error = %failure.message,
                    "Job failed permanently"
                );
                self.queue.fail(&delivery, &failure.to_string()).await?;
                self.jobs_failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("jobs_failed_total", "queue" => queue_label).increment(1);
                Disposition::Failed
            }
        };

        Ok(Some(disposition))
    }

    /// Run `concurrency` consumer loops until `shutdown` flips to true.
    ///
    /// In-flight jobs finish before this returns.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        info!(
            queue = %self.queue_name,
            concurrency = self.config.concurrency,
            "Starting worker pool"
        );

        let mut workers = JoinSet::new();
        for slot in 0..self.config.concurrency.max(1) {
            let pool = self.clone();
            let shutdown = shutdown.clone();
            let span = tracing::info_span!("worker", queue = %self.queue_name, slot);
            workers.spawn(async move { pool.consume(shutdown).await }.instrument(span));
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(queue = %self.queue_name, error = %e, "Worker task aborted");
            }
        }

        info!(
            queue = %self.queue_name,
            completed = self.jobs_completed(),
            failed = self.jobs_failed(),
            "Worker pool stopped"
        );
    }

    async fn consume(&self, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            let idle = match self.process_one().await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(QueueError::Closed) => break,
                Err(e) => {
                    error!(queue = %self.queue_name, error = %e, "Queue operation failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }
}
