use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use super::{Store, StoreError};
use crate::models::batch::{Batch, BatchCounts, BatchStatus};
use crate::models::photo::{Asset, Photo, PhotoAnalysis, PhotoStatus};
use crate::models::project::Project;
use crate::services::ai_metrics::AiCallRecord;
use crate::services::classifier::ClassifiedError;

#[derive(Default)]
struct Tables {
    projects: HashMap<Uuid, Project>,
    batches: HashMap<Uuid, Batch>,
    photos: HashMap<Uuid, Photo>,
    /// Photo ids per batch in insertion order.
    batch_photos: HashMap<Uuid, Vec<Uuid>>,
    ai_calls: Vec<AiCallRecord>,
    /// Remaining `complete_photo` calls that fail as if the pool were exhausted.
    failing_completions: usize,
}

/// In-process store. One mutex guards every table, so each call is atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_project(&self, project: Project) {
        self.tables.lock().projects.insert(project.id, project);
    }

    /// Overwrite a photo's status directly, bypassing the worker.
    pub fn set_photo_status(&self, photo_id: Uuid, status: PhotoStatus) {
        if let Some(photo) = self.tables.lock().photos.get_mut(&photo_id) {
            photo.status = status;
        }
    }

    /// Make the next `n` `complete_photo` calls fail with a database error.
    pub fn fail_completions(&self, n: usize) {
        self.tables.lock().failing_completions = n;
    }

    pub fn ai_calls(&self) -> Vec<AiCallRecord> {
        self.tables.lock().ai_calls.clone()
    }
}

fn photos_of<'a>(tables: &'a Tables, batch_id: &Uuid) -> impl Iterator<Item = &'a Photo> {
    tables
        .batch_photos
        .get(batch_id)
        .into_iter()
        .flatten()
        .filter_map(|id| tables.photos.get(id))
}

#[async_trait]
impl Store for MemoryStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn create_project(&self, user_id: Uuid, name: &str) -> Result<Project, StoreError> {
        let project = Project {
            id: Uuid::new_v4(),
            user_id,
            name: name.to_string(),
        };
        self.insert_project(project.clone());
        Ok(project)
    }

    async fn get_project(&self, project_id: Uuid) -> Result<Option<Project>, StoreError> {
        Ok(self.tables.lock().projects.get(&project_id).cloned())
    }

    async fn create_batch(
        &self,
        project: &Project,
        user_id: Uuid,
        assets: &[Asset],
    ) -> Result<(Batch, Vec<Photo>), StoreError> {
        let now = Utc::now();
        let batch = Batch {
            id: Uuid::new_v4(),
            project_id: project.id,
            user_id,
            status: BatchStatus::Queued,
            counts: BatchCounts {
                queued: assets.len() as u32,
                ..BatchCounts::default()
            },
            inventory_queued: false,
            created_at: now,
            updated_at: now,
        };
        let photos: Vec<Photo> = assets
            .iter()
            .map(|asset| Photo {
                id: Uuid::new_v4(),
                batch_id: batch.id,
                project_id: project.id,
                filename: asset.filename.clone(),
                file_path: asset.file_path.clone(),
                url: asset.url.clone(),
                room_type: asset.room_type.clone(),
                checksum: asset.checksum.clone(),
                status: PhotoStatus::Pending,
                analysis: None,
                error_code: None,
                error_message: None,
                processed_at: None,
                created_at: now,
            })
            .collect();

        let mut tables = self.tables.lock();
        tables.batches.insert(batch.id, batch.clone());
        tables
            .batch_photos
            .insert(batch.id, photos.iter().map(|p| p.id).collect());
        for photo in &photos {
            tables.photos.insert(photo.id, photo.clone());
        }
        Ok((batch, photos))
    }

    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<Batch>, StoreError> {
        Ok(self.tables.lock().batches.get(&batch_id).cloned())
    }

    async fn get_photo(&self, photo_id: Uuid) -> Result<Option<Photo>, StoreError> {
        Ok(self.tables.lock().photos.get(&photo_id).cloned())
    }

    async fn list_batch_photos(&self, batch_id: Uuid) -> Result<Vec<Photo>, StoreError> {
        let tables = self.tables.lock();
        Ok(photos_of(&tables, &batch_id).cloned().collect())
    }

    async fn list_done_photos(
        &self,
        project_id: Uuid,
        batch_id: Option<Uuid>,
    ) -> Result<Vec<Photo>, StoreError> {
        let tables = self.tables.lock();
        let mut photos: Vec<Photo> = tables
            .photos
            .values()
            .filter(|p| p.project_id == project_id)
            .filter(|p| batch_id.map_or(true, |b| p.batch_id == b))
            .filter(|p| p.status == PhotoStatus::Done && p.analysis.is_some())
            .cloned()
            .collect();
        photos.sort_by_key(|p| p.created_at);
        Ok(photos)
    }

    async fn claim_photo(&self, photo_id: Uuid, force: bool) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        let photo = tables
            .photos
            .get_mut(&photo_id)
            .ok_or_else(|| StoreError::NotFound(format!("photo {photo_id}")))?;

        if photo.status == PhotoStatus::Done && !force {
            return Ok(false);
        }
        photo.status = PhotoStatus::Processing;
        photo.error_code = None;
        photo.error_message = None;
        Ok(true)
    }

    async fn complete_photo(
        &self,
        photo_id: Uuid,
        room_type: Option<&str>,
        analysis: &PhotoAnalysis,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        if tables.failing_completions > 0 {
            tables.failing_completions -= 1;
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        let photo = tables
            .photos
            .get_mut(&photo_id)
            .ok_or_else(|| StoreError::NotFound(format!("photo {photo_id}")))?;

        photo.status = PhotoStatus::Done;
        if let Some(room) = room_type {
            photo.room_type = Some(room.to_string());
        }
        photo.analysis = Some(analysis.clone());
        photo.error_code = None;
        photo.error_message = None;
        photo.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn fail_photo(
        &self,
        photo_id: Uuid,
        error: &ClassifiedError,
        terminal: bool,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        let photo = tables
            .photos
            .get_mut(&photo_id)
            .ok_or_else(|| StoreError::NotFound(format!("photo {photo_id}")))?;

        if terminal {
            photo.status = PhotoStatus::Error;
            photo.processed_at = Some(Utc::now());
        }
        photo.error_code = Some(error.code);
        photo.error_message = Some(error.message.clone());
        Ok(())
    }

    async fn refresh_batch_counts(&self, batch_id: Uuid) -> Result<Batch, StoreError> {
        let mut tables = self.tables.lock();
        let counts = BatchCounts::tally(photos_of(&tables, &batch_id).map(|p| p.status));
        let batch = tables
            .batches
            .get_mut(&batch_id)
            .ok_or_else(|| StoreError::NotFound(format!("batch {batch_id}")))?;

        batch.status = counts.derive_status(batch.status);
        batch.counts = counts;
        batch.updated_at = Utc::now();
        Ok(batch.clone())
    }

    async fn latch_inventory_sync(&self, batch_id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        let batch = tables
            .batches
            .get_mut(&batch_id)
            .ok_or_else(|| StoreError::NotFound(format!("batch {batch_id}")))?;

        if batch.inventory_queued || !batch.counts.is_drained() {
            return Ok(false);
        }
        batch.inventory_queued = true;
        batch.updated_at = Utc::now();
        Ok(true)
    }

    async fn record_ai_call(&self, record: &AiCallRecord) -> Result<(), StoreError> {
        self.tables.lock().ai_calls.push(record.clone());
        Ok(())
    }
}
