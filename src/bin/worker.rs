use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use photo_inventory::{
    config::AppConfig,
    db::{self, PgStore, Store},
    services::{
        ai_metrics::AiMetricsSink,
        batch::BatchAggregator,
        images::PhotoImageLoader,
        inventory::InventorySyncWorker,
        photo_worker::PhotoAnalysisWorker,
        queue::{JobQueue, QueueName, RedisJobQueue},
        vision::WorkersAiClient,
        worker_pool::WorkerPool,
    },
};

const AI_METRICS_BUFFER: usize = 1024;
const METRICS_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting photo-inventory worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    let metrics_addr: SocketAddr = config
        .metrics_addr
        .parse()
        .expect("METRICS_ADDR must be a socket address");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("Failed to install Prometheus exporter");

    metrics::describe_counter!("jobs_completed_total", "Jobs acknowledged as completed, per queue");
    metrics::describe_counter!("jobs_retried_total", "Jobs scheduled for another attempt, per queue");
    metrics::describe_counter!("jobs_failed_total", "Jobs failed permanently, per queue");
    metrics::describe_histogram!("ai_call_latency_seconds", "Latency of vision provider calls");
    metrics::describe_counter!("ai_calls_total", "Vision provider calls by operation and outcome");
    metrics::describe_counter!(
        "inventory_triggers_total",
        "Inventory sync jobs enqueued after a batch drained"
    );

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    let store: Arc<dyn Store> = Arc::new(PgStore::new(db_pool));

    tracing::info!("Connecting to Redis job queue");
    let queue: Arc<dyn JobQueue> = Arc::new(
        RedisJobQueue::connect(&config.redis_url, &config.queue_prefix, config.queue_options())
            .await
            .expect("Failed to connect to job queue"),
    );

    let (metrics_sink, metrics_writer) = AiMetricsSink::spawn(store.clone(), AI_METRICS_BUFFER);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    {
        let aggregator = Arc::new(BatchAggregator::new(store.clone(), queue.clone()));
        let vision = Arc::new(WorkersAiClient::new(
            config.cf_account_id.clone(),
            config.cf_api_token.clone(),
            config.ai_model.clone(),
        ));
        let images = Arc::new(PhotoImageLoader::new(config.upload_dir.clone()));

        let photo_pool = Arc::new(WorkerPool::new(
            queue.clone(),
            QueueName::PhotoAnalyze,
            Arc::new(PhotoAnalysisWorker::new(
                store.clone(),
                vision,
                images,
                aggregator,
                metrics_sink,
                config.ai_settings(),
            )
            .with_job_timeout(config.job_timeout())),
            config.worker_pool(config.photo_concurrency),
        ));
        let inventory_pool = Arc::new(WorkerPool::new(
            queue.clone(),
            QueueName::InventorySync,
            Arc::new(InventorySyncWorker::new(store.clone())),
            config.worker_pool(config.inventory_concurrency),
        ));

        let photo_task = tokio::spawn(photo_pool.run(shutdown_rx.clone()));
        let inventory_task = tokio::spawn(inventory_pool.run(shutdown_rx));

        tracing::info!(
            photo_concurrency = config.photo_concurrency,
            inventory_concurrency = config.inventory_concurrency,
            "Worker ready, processing jobs"
        );

        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown signal received, draining in-flight jobs");
        let _ = shutdown_tx.send(true);

        for (name, task) in [("photo-analyze", photo_task), ("inventory-sync", inventory_task)] {
            if let Err(e) = task.await {
                tracing::error!(queue = name, error = %e, "Worker pool task failed");
            }
        }
    }

    // Every sink clone is gone with the pools, so the writer drains and exits.
    if tokio::time::timeout(METRICS_FLUSH_TIMEOUT, metrics_writer).await.is_err() {
        tracing::warn!("Timed out flushing AI call metrics");
    }

    if let Err(e) = queue.close().await {
        tracing::warn!(error = %e, "Failed to close job queue");
    }
    tracing::info!("Worker stopped");
}
