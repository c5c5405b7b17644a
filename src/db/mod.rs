use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::models::batch::Batch;
use crate::models::photo::{Asset, Photo, PhotoAnalysis};
use crate::models::project::Project;
use crate::services::ai_metrics::AiCallRecord;
use crate::services::classifier::ClassifiedError;

pub mod memory;
pub mod queries;

pub use memory::MemoryStore;
pub use queries::PgStore;

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Persistence contract for batches and photos.
///
/// Batch rows are written concurrently by every worker that settles one of
/// their photos, so `refresh_batch_counts` and `latch_inventory_sync` must be
/// serialized by the implementation itself.
#[async_trait]
pub trait Store: Send + Sync {
    async fn health_check(&self) -> Result<(), StoreError>;

    async fn create_project(&self, user_id: Uuid, name: &str) -> Result<Project, StoreError>;

    async fn get_project(&self, project_id: Uuid) -> Result<Option<Project>, StoreError>;

    /// Insert a QUEUED batch and one PENDING photo per asset in a single transaction.
    async fn create_batch(
        &self,
        project: &Project,
        user_id: Uuid,
        assets: &[Asset],
    ) -> Result<(Batch, Vec<Photo>), StoreError>;

    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<Batch>, StoreError>;

    async fn get_photo(&self, photo_id: Uuid) -> Result<Option<Photo>, StoreError>;

    async fn list_batch_photos(&self, batch_id: Uuid) -> Result<Vec<Photo>, StoreError>;

    /// DONE photos with an analysis, for a whole project or a single batch.
    async fn list_done_photos(
        &self,
        project_id: Uuid,
        batch_id: Option<Uuid>,
    ) -> Result<Vec<Photo>, StoreError>;

    /// Flip a photo to PROCESSING and clear its error fields.
    ///
    /// Returns false when the photo is DONE and `force` is not set.
    async fn claim_photo(&self, photo_id: Uuid, force: bool) -> Result<bool, StoreError>;

    async fn complete_photo(
        &self,
        photo_id: Uuid,
        room_type: Option<&str>,
        analysis: &PhotoAnalysis,
    ) -> Result<(), StoreError>;

    /// Record a failed attempt. Only a `terminal` failure moves the photo to ERROR;
    /// otherwise it stays PROCESSING while the queue backs off.
    async fn fail_photo(
        &self,
        photo_id: Uuid,
        error: &ClassifiedError,
        terminal: bool,
    ) -> Result<(), StoreError>;

    /// Recount photos by status, derive the batch status and persist both.
    async fn refresh_batch_counts(&self, batch_id: Uuid) -> Result<Batch, StoreError>;

    /// Atomically set `inventory_queued` if it is unset and the batch is drained.
    /// Returns true only for the caller that flipped it.
    async fn latch_inventory_sync(&self, batch_id: Uuid) -> Result<bool, StoreError>;

    /// Append one AI call record.
    async fn record_ai_call(&self, record: &AiCallRecord) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}
