use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::db::{Store, StoreError};
use crate::models::inventory::InventorySummary;
use crate::models::job::InventorySyncJob;
use crate::services::classifier::{ClassifiedError, ErrorCode};
use crate::services::queue::{Delivery, JobFailure};
use crate::services::worker_pool::JobHandler;

/// Folds DONE photos of a batch (or a whole project) into room totals.
pub struct InventorySyncWorker {
    store: Arc<dyn Store>,
}

impl InventorySyncWorker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn sync(&self, job: &InventorySyncJob) -> Result<InventorySummary, InventoryError> {
        let photos = self
            .store
            .list_done_photos(job.project_id, job.batch_id)
            .await?;
        let summary = InventorySummary::from_photos(photos.iter());

        info!(
            project_id = %job.project_id,
            batch_id = ?job.batch_id,
            rooms = summary.rooms.len(),
            total_items = summary.total_items,
            total_volume = summary.total_volume,
            "Inventory summary computed"
        );

        Ok(summary)
    }
}

#[async_trait]
impl JobHandler for InventorySyncWorker {
    async fn handle(&self, delivery: &Delivery) -> Result<serde_json::Value, JobFailure> {
        let job: InventorySyncJob = delivery
            .payload()
            .map_err(|e| JobFailure::fatal(ErrorCode::BadInput, format!("invalid job payload: {e}")))?;
        // Read failures are always retried.
        let summary = self
            .sync(&job)
            .await
            .map_err(|e| JobFailure::from(ClassifiedError::unclassified(&e)))?;
        serde_json::to_value(summary).map_err(|e| JobFailure::fatal(ErrorCode::Unknown, e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error(transparent)]
    Store(#[from] StoreError),
}
