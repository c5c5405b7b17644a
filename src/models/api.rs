use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::batch::BatchStatus;
use crate::services::queue::QueueStats;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProjectRequest {
    #[garde(length(min = 1, max = 200))]
    pub name: String,
}

/// Non-file fields of a batch upload.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct BatchUploadForm {
    #[garde(length(min = 1, max = 64))]
    pub room_type: Option<String>,
}

/// Response after creating a batch and enqueuing its photos.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCreatedResponse {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub photos: Vec<CreatedPhoto>,
    pub jobs_enqueued: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedPhoto {
    pub id: Uuid,
    pub filename: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeQuery {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub photo_id: Uuid,
    pub job_id: String,
    pub deduplicated: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct InventoryQuery {
    pub batch_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct QueueStatsResponse {
    pub photo_analyze: QueueStats,
    pub inventory_sync: QueueStats,
}
