use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use photo_inventory::{
    app_state::AppState,
    config::AppConfig,
    db::{self, PgStore},
    routes::{self, metrics::MetricsState},
    services::queue::{JobQueue, RedisJobQueue},
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing photo-inventory API");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!("batches_created_total", "Batches accepted for analysis");
    metrics::describe_counter!("photos_submitted_total", "Photos submitted across all batches");
    metrics::describe_counter!(
        "inventory_triggers_total",
        "Inventory sync jobs enqueued after a batch drained"
    );
    metrics::describe_gauge!("queue_jobs", "Jobs per queue and state at scrape time");

    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Connecting to Redis job queue");
    let queue: Arc<dyn JobQueue> = Arc::new(
        RedisJobQueue::connect(&config.redis_url, &config.queue_prefix, config.queue_options())
            .await
            .expect("Failed to connect to job queue"),
    );

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .expect("Failed to create upload directory");

    let state = AppState::new(
        Arc::new(PgStore::new(db_pool)),
        queue.clone(),
        config.upload_dir.clone(),
    );

    let metrics_state = MetricsState {
        handle: prometheus_handle,
        queue: queue.clone(),
    };

    let app = routes::router(state)
        .merge(
            Router::new()
                .route("/metrics", get(routes::metrics::prometheus_metrics))
                .with_state(metrics_state),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(routes::MAX_UPLOAD_BYTES));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .expect("Server error");

    if let Err(e) = queue.close().await {
        tracing::warn!(error = %e, "Failed to close job queue");
    }
}
