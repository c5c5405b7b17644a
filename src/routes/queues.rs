use axum::extract::State;
use axum::Json;

use super::ApiError;
use crate::app_state::AppState;
use crate::models::api::QueueStatsResponse;
use crate::services::queue::QueueName;

/// GET /api/v1/queues
pub async fn queue_stats(State(state): State<AppState>) -> Result<Json<QueueStatsResponse>, ApiError> {
    Ok(Json(QueueStatsResponse {
        photo_analyze: state.queue.stats(QueueName::PhotoAnalyze).await?,
        inventory_sync: state.queue.stats(QueueName::InventorySync).await?,
    }))
}
