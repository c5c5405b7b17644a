use axum::extract::State;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::services::queue::{JobQueue, QueueName};

#[derive(Clone)]
pub struct MetricsState {
    pub handle: Arc<PrometheusHandle>,
    pub queue: Arc<dyn JobQueue>,
}

/// GET /metrics: Prometheus text format, with queue depth gauges refreshed on scrape.
pub async fn prometheus_metrics(State(state): State<MetricsState>) -> String {
    for queue in QueueName::ALL {
        match state.queue.stats(queue).await {
            Ok(stats) => {
                let name = queue.to_string();
                for (job_state, value) in [
                    ("waiting", stats.waiting),
                    ("active", stats.active),
                    ("delayed", stats.delayed),
                    ("failed", stats.failed),
                ] {
                    metrics::gauge!("queue_jobs", "queue" => name.clone(), "state" => job_state)
                        .set(value as f64);
                }
            }
            Err(e) => tracing::warn!(queue = %queue, error = %e, "Failed to read queue stats"),
        }
    }
    state.handle.render()
}
