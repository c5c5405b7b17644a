use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Instant;
use tracing::debug;

use super::{
    Delivery, FinishedJob, JobHandle, JobQueue, QueueError, QueueName, QueueOptions, QueueStats,
};

#[derive(Default)]
struct QueueState {
    /// Live job records keyed by id.
    jobs: HashMap<String, Delivery>,
    waiting: VecDeque<String>,
    active: HashMap<String, Instant>,
    delayed: Vec<(Instant, String)>,
    completed: VecDeque<FinishedJob>,
    failed: VecDeque<FinishedJob>,
}

impl QueueState {
    fn promote_due(&mut self, now: Instant) {
        let (due, pending): (Vec<_>, Vec<_>) = self.delayed.drain(..).partition(|(at, _)| *at <= now);
        self.delayed = pending;
        self.waiting.extend(due.into_iter().map(|(_, id)| id));
    }

    fn reclaim_stalled(&mut self, now: Instant) {
        let stalled: Vec<String> = self
            .active
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in stalled {
            self.active.remove(&id);
            self.waiting.push_front(id);
        }
    }
}

fn push_bounded(list: &mut VecDeque<FinishedJob>, entry: FinishedJob, keep: usize) {
    list.push_front(entry);
    list.truncate(keep);
}

/// In-process queue with the same semantics as the Redis backend.
pub struct MemoryJobQueue {
    state: Mutex<HashMap<QueueName, QueueState>>,
    options: QueueOptions,
    closed: Mutex<bool>,
}

impl MemoryJobQueue {
    pub fn new(options: QueueOptions) -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            options,
            closed: Mutex::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if *self.closed.lock() {
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    /// Ids currently waiting, oldest first.
    pub fn waiting_ids(&self, queue: QueueName) -> Vec<String> {
        self.state
            .lock()
            .get(&queue)
            .map(|s| s.waiting.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Most recent successful results, newest first.
    pub fn completed_jobs(&self, queue: QueueName) -> Vec<FinishedJob> {
        self.state
            .lock()
            .get(&queue)
            .map(|s| s.completed.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new(QueueOptions::default())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(
        &self,
        queue: QueueName,
        job_id: &str,
        payload: serde_json::Value,
    ) -> Result<JobHandle, QueueError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        let q = state.entry(queue).or_default();

        let deduplicated = q.jobs.contains_key(job_id);
        if !deduplicated {
            q.jobs.insert(
                job_id.to_string(),
                Delivery::new(queue, job_id, payload, self.options.retry.max_attempts),
            );
            q.waiting.push_back(job_id.to_string());
        }
        debug!(job_id = %job_id, queue = %queue, deduplicated, "Enqueued job");

        Ok(JobHandle {
            id: job_id.to_string(),
            queue,
            deduplicated,
        })
    }

    async fn dequeue(&self, queue: QueueName) -> Result<Option<Delivery>, QueueError> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut state = self.state.lock();
        let q = state.entry(queue).or_default();

        q.promote_due(now);
        q.reclaim_stalled(now);

        while let Some(id) = q.waiting.pop_front() {
            let Some(record) = q.jobs.get_mut(&id) else {
                continue;
            };
            record.attempt += 1;
            let delivery = record.clone();
            q.active.insert(id, now + self.options.lease);
            return Ok(Some(delivery));
        }
        Ok(None)
    }

    async fn complete(&self, delivery: &Delivery, result: &serde_json::Value) -> Result<(), QueueError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        let q = state.entry(delivery.queue).or_default();

        q.active.remove(&delivery.id);
        q.jobs.remove(&delivery.id);
        push_bounded(
            &mut q.completed,
            FinishedJob {
                id: delivery.id.clone(),
                attempt: delivery.attempt,
                finished_at: Utc::now(),
                result: Some(result.clone()),
                reason: None,
            },
            self.options.keep_completed,
        );
        Ok(())
    }

    async fn retry(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        self.ensure_open()?;
        let delay = self.options.retry.delay_for_attempt(delivery.attempt);
        let mut state = self.state.lock();
        let q = state.entry(delivery.queue).or_default();

        if q.active.remove(&delivery.id).is_none() {
            return Err(QueueError::NotActive(delivery.id.clone()));
        }
        if let Some(record) = q.jobs.get_mut(&delivery.id) {
            record.attempt = delivery.attempt;
            record.last_error = Some(reason.to_string());
        }
        q.delayed.push((Instant::now() + delay, delivery.id.clone()));
        Ok(())
    }

    async fn fail(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        let q = state.entry(delivery.queue).or_default();

        q.active.remove(&delivery.id);
        q.jobs.remove(&delivery.id);
        push_bounded(
            &mut q.failed,
            FinishedJob {
                id: delivery.id.clone(),
                attempt: delivery.attempt,
                finished_at: Utc::now(),
                result: None,
                reason: Some(reason.to_string()),
            },
            self.options.keep_failed,
        );
        Ok(())
    }

    async fn stats(&self, queue: QueueName) -> Result<QueueStats, QueueError> {
        self.ensure_open()?;
        let state = self.state.lock();
        Ok(state
            .get(&queue)
            .map(|q| QueueStats {
                waiting: q.waiting.len() as u64,
                active: q.active.len() as u64,
                delayed: q.delayed.len() as u64,
                completed: q.completed.len() as u64,
                failed: q.failed.len() as u64,
            })
            .unwrap_or_default())
    }

    async fn failed_jobs(&self, queue: QueueName, limit: usize) -> Result<Vec<FinishedJob>, QueueError> {
        self.ensure_open()?;
        let state = self.state.lock();
        Ok(state
            .get(&queue)
            .map(|q| q.failed.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        self.ensure_open()
    }

    async fn close(&self) -> Result<(), QueueError> {
        *self.closed.lock() = true;
        Ok(())
    }
}
