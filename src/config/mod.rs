use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::services::queue::{QueueOptions, RetryPolicy};
use crate::services::vision::AiSettings;
use crate::services::worker_pool::WorkerPoolConfig;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Prometheus exporter address used by the worker process.
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for job queues
    pub redis_url: String,

    /// Cloudflare account ID
    pub cf_account_id: String,

    /// Cloudflare Workers AI API token
    pub cf_api_token: String,

    /// Root directory for uploaded photo files.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Provider label recorded with every AI call.
    #[serde(default = "default_ai_provider")]
    pub ai_provider: String,

    /// Vision model used for analysis and room detection.
    #[serde(default = "default_ai_model")]
    pub ai_model: String,

    #[serde(default = "default_ai_timeout_ms")]
    pub ai_timeout_ms: u64,

    #[serde(default = "default_room_detect_timeout_ms")]
    pub room_detect_timeout_ms: u64,

    /// Run room detection for photos submitted without a room type.
    #[serde(default = "default_true")]
    pub detect_rooms: bool,

    /// Worker pool size for `photo-analyze`.
    #[serde(default = "default_concurrency")]
    pub photo_concurrency: usize,

    /// Worker pool size for `inventory-sync`.
    #[serde(default = "default_concurrency")]
    pub inventory_concurrency: usize,

    /// Redis key prefix shared by both queues.
    #[serde(default = "default_queue_prefix")]
    pub queue_prefix: String,

    /// How long a dequeued job may stay active before it is considered stalled.
    #[serde(default = "default_job_lease_secs")]
    pub job_lease_secs: u64,

    #[serde(default = "default_keep_completed")]
    pub keep_completed: usize,

    #[serde(default = "default_keep_failed")]
    pub keep_failed: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound on the image, room and analysis steps of one photo attempt.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9100".to_string()
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./uploads")
}

fn default_ai_provider() -> String {
    "workers-ai".to_string()
}

fn default_ai_model() -> String {
    "@cf/meta/llama-3.2-11b-vision-instruct".to_string()
}

fn default_ai_timeout_ms() -> u64 {
    60_000
}

fn default_room_detect_timeout_ms() -> u64 {
    15_000
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    2
}

fn default_queue_prefix() -> String {
    "photo_inventory".to_string()
}

fn default_job_lease_secs() -> u64 {
    600
}

fn default_keep_completed() -> usize {
    100
}

fn default_keep_failed() -> usize {
    1000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_job_timeout_secs() -> u64 {
    300
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Queue behaviour shared by the API (producer) and the worker (consumer).
    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            retry: RetryPolicy::default(),
            keep_completed: self.keep_completed,
            keep_failed: self.keep_failed,
            lease: Duration::from_secs(self.job_lease_secs),
        }
    }

    pub fn ai_settings(&self) -> AiSettings {
        AiSettings {
            provider: self.ai_provider.clone(),
            model: self.ai_model.clone(),
            timeout: Duration::from_millis(self.ai_timeout_ms),
            room_detect_timeout: Duration::from_millis(self.room_detect_timeout_ms),
            detect_rooms: self.detect_rooms,
        }
    }

    pub fn worker_pool(&self, concurrency: usize) -> WorkerPoolConfig {
        WorkerPoolConfig {
            concurrency,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}
