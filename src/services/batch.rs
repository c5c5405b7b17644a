//! Batch state machine: creation, recounting, progress and the
//! exactly-once inventory trigger.

use garde::Validate;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::db::{Store, StoreError};
use crate::models::batch::{Batch, BatchCounts, BatchProgress, BatchUpdate, PhotoProgress};
use crate::models::inventory::InventorySummary;
use crate::models::job::{InventorySyncJob, PhotoAnalyzeJob};
use crate::models::photo::{Asset, Photo};
use crate::services::queue::{JobHandle, JobQueue, QueueError};

/// What `on_photo_settled` did.
#[derive(Debug, Clone)]
pub struct SettleOutcome {
    pub update: BatchUpdate,
    /// Set only by the call that won the latch and enqueued successfully.
    pub inventory_job: Option<JobHandle>,
}

pub struct BatchAggregator {
    store: Arc<dyn Store>,
    queue: Arc<dyn JobQueue>,
}

impl BatchAggregator {
    pub fn new(store: Arc<dyn Store>, queue: Arc<dyn JobQueue>) -> Self {
        Self { store, queue }
    }

    /// Persist a QUEUED batch with one PENDING photo per asset.
    pub async fn create_batch(
        &self,
        project_id: Uuid,
        user_id: Uuid,
        assets: &[Asset],
    ) -> Result<(Batch, Vec<Photo>), BatchError> {
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| BatchError::NotFound(format!("project {project_id}")))?;

        if !project.is_owned_by(user_id) {
            return Err(BatchError::Unauthorized);
        }
        if assets.is_empty() {
            return Err(BatchError::EmptyBatch);
        }
        for asset in assets {
            asset
                .validate()
                .map_err(|e| BatchError::Validation(format!("{}: {e}", asset.filename)))?;
        }

        let (batch, photos) = self.store.create_batch(&project, user_id, assets).await?;

        metrics::counter!("batches_created_total").increment(1);
        metrics::counter!("photos_submitted_total").increment(photos.len() as u64);
        info!(
            batch_id = %batch.id,
            project_id = %project_id,
            photos = photos.len(),
            "Batch created"
        );

        Ok((batch, photos))
    }

    /// Push one `photo-analyze` job per photo. Returns how many were new.
    pub async fn enqueue_photos(
        &self,
        batch: &Batch,
        photos: &[Photo],
        user_id: Uuid,
    ) -> Result<usize, BatchError> {
        let mut enqueued = 0;
        for photo in photos {
            let job = PhotoAnalyzeJob {
                photo_id: photo.id,
                user_id,
                asset_id: None,
                room_type: photo.room_type.clone(),
                batch_id: Some(batch.id),
                force: false,
            };
            let handle = self.queue.enqueue_photo_analysis(&job).await?;
            if !handle.deduplicated {
                enqueued += 1;
            }
        }
        Ok(enqueued)
    }

    /// Recount the batch's photos and persist the derived status.
    pub async fn update_batch_counts(&self, batch_id: Uuid) -> Result<BatchUpdate, BatchError> {
        let batch = self.store.refresh_batch_counts(batch_id).await?;
        let counts = batch.counts;

        info!(
            batch_id = %batch_id,
            status = %batch.status,
            queued = counts.queued,
            processing = counts.processing,
            completed = counts.completed,
            failed = counts.failed,
            "Batch counts updated"
        );

        Ok(BatchUpdate {
            batch,
            counts,
            is_complete: counts.is_drained(),
        })
    }

    /// Read-only snapshot for progress consumers.
    pub async fn compute_batch_progress(&self, batch_id: Uuid) -> Result<BatchProgress, BatchError> {
        let batch = self
            .store
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| BatchError::NotFound(format!("batch {batch_id}")))?;
        let photos = self.store.list_batch_photos(batch_id).await?;

        let counts = BatchCounts::tally(photos.iter().map(|p| p.status));
        let inventory_summary = batch
            .status
            .has_inventory()
            .then(|| InventorySummary::from_photos(photos.iter()));

        Ok(BatchProgress {
            batch_id: batch.id,
            project_id: batch.project_id,
            status: batch.status,
            progress: counts.progress_percent(),
            counts: counts.into(),
            photos: photos.iter().map(PhotoProgress::from).collect(),
            inventory_summary,
        })
    }

    /// Atomically latch the inventory trigger. True for exactly one caller.
    pub async fn should_trigger_inventory_sync(&self, batch_id: Uuid) -> Result<bool, BatchError> {
        let won = self.store.latch_inventory_sync(batch_id).await?;
        info!(batch_id = %batch_id, won, "Inventory latch checked");
        Ok(won)
    }

    /// Recount after a photo settled and fire the inventory job once the batch drains.
    pub async fn on_photo_settled(&self, batch_id: Uuid) -> Result<SettleOutcome, BatchError> {
        let update = self.update_batch_counts(batch_id).await?;
        if !update.is_complete || !self.should_trigger_inventory_sync(batch_id).await? {
            return Ok(SettleOutcome {
                update,
                inventory_job: None,
            });
        }

        let job = InventorySyncJob {
            project_id: update.batch.project_id,
            user_id: update.batch.user_id,
            batch_id: Some(batch_id),
        };

        // The latch stays set if this fails; the summary is still available on demand.
        let inventory_job = match self.queue.enqueue_inventory_sync(&job).await {
            Ok(handle) => {
                metrics::counter!("inventory_triggers_total").increment(1);
                info!(batch_id = %batch_id, job_id = %handle.id, "Inventory sync enqueued");
                Some(handle)
            }
            Err(e) => {
                error!(batch_id = %batch_id, error = %e, "Failed to enqueue inventory sync");
                None
            }
        };

        Ok(SettleOutcome {
            update,
            inventory_job,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("project is not owned by the caller")]
    Unauthorized,

    #[error("a batch needs at least one photo")]
    EmptyBatch,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}
