//! Durable at-least-once job queues.
//!
//! Two named queues (`photo-analyze`, `inventory-sync`) share one broker but
//! never share a job-id namespace. Jobs carry a caller-chosen id, which makes
//! re-submitting a live job a no-op.

mod memory_queue;
mod redis_queue;

pub use memory_queue::MemoryJobQueue;
pub use redis_queue::{RedisJobQueue, RedisKeys};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{Display, EnumString};

use crate::models::job::{InventorySyncJob, PhotoAnalyzeJob};
use crate::services::classifier::{self, ClassifiedError, ErrorCode};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum QueueName {
    PhotoAnalyze,
    InventorySync,
}

impl QueueName {
    pub const ALL: [QueueName; 2] = [QueueName::PhotoAnalyze, QueueName::InventorySync];
}

/// Retry policy: exponential backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    /// 3 attempts, waiting 5s, 20s, 80s...
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(5),
            multiplier: 4,
        }
    }
}

impl RetryPolicy {
    /// Retries without waiting. Used by tests and local runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            multiplier: 1,
        }
    }

    /// Delay before the attempt that follows `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.saturating_pow(attempt - 1);
        self.initial_delay.saturating_mul(factor)
    }
}

/// Broker-level settings shared by producers and consumers.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub retry: RetryPolicy,
    /// Completed jobs kept for inspection.
    pub keep_completed: usize,
    /// Failed jobs kept for inspection.
    pub keep_failed: usize,
    /// An active job older than this is treated as stalled and redelivered.
    pub lease: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            keep_completed: 100,
            keep_failed: 1000,
            lease: Duration::from_secs(600),
        }
    }
}

/// A job as handed to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: String,
    pub queue: QueueName,
    pub payload: serde_json::Value,
    /// Attempt currently running, starting at 1.
    pub attempt: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Delivery {
    pub(crate) fn new(queue: QueueName, id: &str, payload: serde_json::Value, max_attempts: u32) -> Self {
        Self {
            id: id.to_string(),
            queue,
            payload,
            attempt: 0,
            max_attempts,
            enqueued_at: Utc::now(),
            last_error: None,
        }
    }

    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, QueueError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// No retry follows a failure of this attempt.
    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Returned by `enqueue`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobHandle {
    pub id: String,
    pub queue: QueueName,
    /// A live job with this id already existed; nothing new was queued.
    pub deduplicated: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub delayed: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Retained record of a finished job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishedJob {
    pub id: String,
    pub attempt: u32,
    pub finished_at: DateTime<Utc>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Failure reported by a job handler.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct JobFailure {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
}

impl JobFailure {
    /// A failure that must not be retried whatever its text says.
    pub fn fatal(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: false,
        }
    }

    /// Classify an arbitrary error and keep its retryability.
    pub fn from_error<E>(err: &E) -> Self
    where
        E: std::fmt::Display + ?Sized,
    {
        classifier::classify_error(err).into()
    }
}

impl From<ClassifiedError> for JobFailure {
    fn from(c: ClassifiedError) -> Self {
        Self {
            code: c.code,
            message: c.message,
            retryable: c.retryable,
        }
    }
}

/// Queue backend contract.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add a job under `job_id`. A live job with the same id absorbs the call.
    async fn enqueue(
        &self,
        queue: QueueName,
        job_id: &str,
        payload: serde_json::Value,
    ) -> Result<JobHandle, QueueError>;

    /// Take the next job, if any, and mark it active.
    async fn dequeue(&self, queue: QueueName) -> Result<Option<Delivery>, QueueError>;

    /// Acknowledge success.
    async fn complete(&self, delivery: &Delivery, result: &serde_json::Value) -> Result<(), QueueError>;

    /// Schedule another attempt after the policy's backoff.
    async fn retry(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError>;

    /// Record a terminal failure.
    async fn fail(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError>;

    async fn stats(&self, queue: QueueName) -> Result<QueueStats, QueueError>;

    /// Most recent failures, newest first.
    async fn failed_jobs(&self, queue: QueueName, limit: usize) -> Result<Vec<FinishedJob>, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;

    /// Release the broker connection. Later calls fail with `QueueError::Closed`.
    async fn close(&self) -> Result<(), QueueError>;

    async fn enqueue_photo_analysis(&self, job: &PhotoAnalyzeJob) -> Result<JobHandle, QueueError> {
        let payload = serde_json::to_value(job)?;
        self.enqueue(QueueName::PhotoAnalyze, &job.job_id(), payload).await
    }

    async fn enqueue_inventory_sync(&self, job: &InventorySyncJob) -> Result<JobHandle, QueueError> {
        let payload = serde_json::to_value(job)?;
        self.enqueue(QueueName::InventorySync, &job.job_id(), payload).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Job {0} is not active")]
    NotActive(String),

    #[error("Queue connection is closed")]
    Closed,
}
