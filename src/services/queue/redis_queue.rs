use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tracing::{debug, info, warn};

use super::{
    Delivery, FinishedJob, JobHandle, JobQueue, QueueError, QueueName, QueueOptions, QueueStats,
};

/// Insert the job record and push its id, unless a live record exists.
const ENQUEUE_LUA: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
redis.call('SET', KEYS[1], ARGV[1])
redis.call('LPUSH', KEYS[2], ARGV[2])
return 1
"#;

/// Promote due retries, reclaim expired leases, then pop the oldest waiting id.
const DEQUEUE_LUA: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', ARGV[1])
for _, id in ipairs(due) do
  redis.call('ZREM', KEYS[3], id)
  redis.call('LPUSH', KEYS[1], id)
end
local stalled = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for _, id in ipairs(stalled) do
  redis.call('ZREM', KEYS[2], id)
  redis.call('RPUSH', KEYS[1], id)
end
local id = redis.call('RPOP', KEYS[1])
if not id then
  return {'', #stalled}
end
redis.call('ZADD', KEYS[2], ARGV[2], id)
return {id, #stalled}
"#;

/// Redis key builder. Every queue gets its own namespace.
#[derive(Debug, Clone)]
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Waiting job ids (list, LPUSH/RPOP).
    pub fn waiting(&self, queue: QueueName) -> String {
        format!("{}:{}:waiting", self.prefix, queue)
    }

    /// Active job ids scored by lease deadline (ms).
    pub fn active(&self, queue: QueueName) -> String {
        format!("{}:{}:active", self.prefix, queue)
    }

    /// Job ids waiting out a retry backoff, scored by due time (ms).
    pub fn delayed(&self, queue: QueueName) -> String {
        format!("{}:{}:delayed", self.prefix, queue)
    }

    pub fn completed(&self, queue: QueueName) -> String {
        format!("{}:{}:completed", self.prefix, queue)
    }

    pub fn failed(&self, queue: QueueName) -> String {
        format!("{}:{}:failed", self.prefix, queue)
    }

    /// Live job record; its presence is what de-duplicates enqueues.
    pub fn job(&self, queue: QueueName, job_id: &str) -> String {
        format!("{}:{}:job:{}", self.prefix, queue, job_id)
    }
}

/// Redis-backed job queue with retry and stalled-job recovery.
pub struct RedisJobQueue {
    conn: Mutex<Option<MultiplexedConnection>>,
    keys: RedisKeys,
    options: QueueOptions,
    enqueue_script: Script,
    dequeue_script: Script,
}

impl RedisJobQueue {
    /// Open the broker connection and verify it answers.
    pub async fn connect(redis_url: &str, prefix: &str, options: QueueOptions) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;

        info!(prefix = %prefix, "Connected to Redis job queue");

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            keys: RedisKeys::new(prefix),
            options,
            enqueue_script: Script::new(ENQUEUE_LUA),
            dequeue_script: Script::new(DEQUEUE_LUA),
        })
    }

    fn conn(&self) -> Result<MultiplexedConnection, QueueError> {
        self.conn.lock().clone().ok_or(QueueError::Closed)
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn finished(delivery: &Delivery, result: Option<&serde_json::Value>, reason: Option<&str>) -> FinishedJob {
        FinishedJob {
            id: delivery.id.clone(),
            attempt: delivery.attempt,
            finished_at: Utc::now(),
            result: result.cloned(),
            reason: reason.map(str::to_string),
        }
    }

    /// `ZREMRANGEBYRANK` stop index that keeps the newest `keep` members.
    fn trim_stop(keep: usize) -> isize {
        -(keep as isize) - 1
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(
        &self,
        queue: QueueName,
        job_id: &str,
        payload: serde_json::Value,
    ) -> Result<JobHandle, QueueError> {
        let mut conn = self.conn()?;
        let delivery = Delivery::new(queue, job_id, payload, self.options.retry.max_attempts);
        let record = serde_json::to_string(&delivery)?;

        let created: i64 = self
            .enqueue_script
            .key(self.keys.job(queue, job_id))
            .key(self.keys.waiting(queue))
            .arg(&record)
            .arg(job_id)
            .invoke_async(&mut conn)
            .await?;

        let deduplicated = created == 0;
        debug!(job_id = %job_id, queue = %queue, deduplicated, "Enqueued job");

        Ok(JobHandle {
            id: job_id.to_string(),
            queue,
            deduplicated,
        })
    }

    async fn dequeue(&self, queue: QueueName) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.conn()?;
        let now = Self::now_ms();
        let lease_deadline = now + self.options.lease.as_millis() as i64;

        let (job_id, reclaimed): (String, i64) = self
            .dequeue_script
            .key(self.keys.waiting(queue))
            .key(self.keys.active(queue))
            .key(self.keys.delayed(queue))
            .arg(now)
            .arg(lease_deadline)
            .invoke_async(&mut conn)
            .await?;

        if reclaimed > 0 {
            warn!(queue = %queue, count = reclaimed, "Reclaimed stalled jobs for redelivery");
        }
        if job_id.is_empty() {
            return Ok(None);
        }

        let job_key = self.keys.job(queue, &job_id);
        let record: Option<String> = conn.get(&job_key).await?;
        let Some(record) = record else {
            warn!(job_id = %job_id, queue = %queue, "Dropping job id without a record");
            conn.zrem::<_, _, ()>(self.keys.active(queue), &job_id).await?;
            return Ok(None);
        };

        let mut delivery: Delivery = serde_json::from_str(&record)?;
        delivery.attempt += 1;
        conn.set::<_, _, ()>(&job_key, serde_json::to_string(&delivery)?)
            .await?;

        debug!(job_id = %job_id, queue = %queue, attempt = delivery.attempt, "Dequeued job");
        Ok(Some(delivery))
    }

    async fn complete(&self, delivery: &Delivery, result: &serde_json::Value) -> Result<(), QueueError> {
        let mut conn = self.conn()?;
        let queue = delivery.queue;
        let finished = serde_json::to_string(&Self::finished(delivery, Some(result), None))?;
        let completed_key = self.keys.completed(queue);

        redis::pipe()
            .atomic()
            .zrem(self.keys.active(queue), &delivery.id)
            .ignore()
            .del(self.keys.job(queue, &delivery.id))
            .ignore()
            .zadd(&completed_key, finished, Self::now_ms())
            .ignore()
            .zremrangebyrank(&completed_key, 0, Self::trim_stop(self.options.keep_completed))
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(job_id = %delivery.id, queue = %queue, "Completed job");
        Ok(())
    }

    async fn retry(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        let mut conn = self.conn()?;
        let queue = delivery.queue;
        let delay = self.options.retry.delay_for_attempt(delivery.attempt);
        let due = Self::now_ms() + delay.as_millis() as i64;

        let mut record = delivery.clone();
        record.last_error = Some(reason.to_string());

        redis::pipe()
            .atomic()
            .zrem(self.keys.active(queue), &delivery.id)
            .ignore()
            .set(self.keys.job(queue, &delivery.id), serde_json::to_string(&record)?)
            .ignore()
            .zadd(self.keys.delayed(queue), &delivery.id, due)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(
            job_id = %delivery.id,
            queue = %queue,
            attempt = delivery.attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduled job retry"
        );
        Ok(())
    }

    async fn fail(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        let mut conn = self.conn()?;
        let queue = delivery.queue;
        let finished = serde_json::to_string(&Self::finished(delivery, None, Some(reason)))?;
        let failed_key = self.keys.failed(queue);

        redis::pipe()
            .atomic()
            .zrem(self.keys.active(queue), &delivery.id)
            .ignore()
            .del(self.keys.job(queue, &delivery.id))
            .ignore()
            .zadd(&failed_key, finished, Self::now_ms())
            .ignore()
            .zremrangebyrank(&failed_key, 0, Self::trim_stop(self.options.keep_failed))
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        warn!(job_id = %delivery.id, queue = %queue, attempt = delivery.attempt, reason = %reason, "Job failed");
        Ok(())
    }

    async fn stats(&self, queue: QueueName) -> Result<QueueStats, QueueError> {
        let mut conn = self.conn()?;
        let (waiting, active, delayed, completed, failed): (u64, u64, u64, u64, u64) = redis::pipe()
            .llen(self.keys.waiting(queue))
            .zcard(self.keys.active(queue))
            .zcard(self.keys.delayed(queue))
            .zcard(self.keys.completed(queue))
            .zcard(self.keys.failed(queue))
            .query_async(&mut conn)
            .await?;

        Ok(QueueStats {
            waiting,
            active,
            delayed,
            completed,
            failed,
        })
    }

    async fn failed_jobs(&self, queue: QueueName, limit: usize) -> Result<Vec<FinishedJob>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn()?;
        let records: Vec<String> = conn
            .zrevrange(self.keys.failed(queue), 0, limit as isize - 1)
            .await?;

        records
            .iter()
            .map(|record| serde_json::from_str(record).map_err(QueueError::from))
            .collect()
    }

    /// Check Redis connectivity (for health checks).
    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.conn()?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        if self.conn.lock().take().is_some() {
            info!("Closed Redis job queue connection");
        }
        Ok(())
    }
}
