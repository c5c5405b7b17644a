use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use super::{Store, StoreError};
use crate::models::batch::{Batch, BatchCounts, BatchStatus};
use crate::models::photo::{Asset, Photo, PhotoAnalysis, PhotoStatus};
use crate::models::project::Project;
use crate::services::ai_metrics::AiCallRecord;
use crate::services::classifier::{ClassifiedError, ErrorCode};

const BATCH_COLUMNS: &str = "id, project_id, user_id, status, counts_queued, counts_processing, \
     counts_completed, counts_failed, inventory_queued, created_at, updated_at";

const PHOTO_COLUMNS: &str = "id, batch_id, project_id, filename, file_path, url, room_type, checksum, \
     status, analysis, error_code, error_message, processed_at, created_at";

/// PostgreSQL implementation of the persistence contract.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_text<T: FromStr>(column: &str, value: &str) -> Result<T, StoreError> {
    value
        .parse()
        .map_err(|_| StoreError::Corrupt(format!("unexpected {column} value '{value}'")))
}

fn count(row: &PgRow, column: &str) -> Result<u32, StoreError> {
    let value: i32 = row.try_get(column)?;
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative {column}")))
}

fn batch_from_row(row: &PgRow) -> Result<Batch, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(Batch {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        user_id: row.try_get("user_id")?,
        status: parse_text::<BatchStatus>("batch status", &status)?,
        counts: BatchCounts {
            queued: count(row, "counts_queued")?,
            processing: count(row, "counts_processing")?,
            completed: count(row, "counts_completed")?,
            failed: count(row, "counts_failed")?,
        },
        inventory_queued: row.try_get("inventory_queued")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn photo_from_row(row: &PgRow) -> Result<Photo, StoreError> {
    let status: String = row.try_get("status")?;
    let error_code: Option<String> = row.try_get("error_code")?;
    let analysis: Option<Json<PhotoAnalysis>> = row.try_get("analysis")?;

    Ok(Photo {
        id: row.try_get("id")?,
        batch_id: row.try_get("batch_id")?,
        project_id: row.try_get("project_id")?,
        filename: row.try_get("filename")?,
        file_path: row.try_get("file_path")?,
        url: row.try_get("url")?,
        room_type: row.try_get("room_type")?,
        checksum: row.try_get("checksum")?,
        status: parse_text::<PhotoStatus>("photo status", &status)?,
        analysis: analysis.map(|json| json.0),
        error_code: error_code
            .as_deref()
            .map(|code| parse_text::<ErrorCode>("error code", code))
            .transpose()?,
        error_message: row.try_get("error_message")?,
        processed_at: row.try_get("processed_at")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn create_project(&self, user_id: Uuid, name: &str) -> Result<Project, StoreError> {
        let row = sqlx::query(
            "INSERT INTO projects (id, user_id, name) VALUES ($1, $2, $3) RETURNING id, user_id, name",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(Project {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            name: row.try_get("name")?,
        })
    }

    async fn get_project(&self, project_id: Uuid) -> Result<Option<Project>, StoreError> {
        let row = sqlx::query("SELECT id, user_id, name FROM projects WHERE id = $1")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(r) => Some(Project {
                id: r.try_get("id")?,
                user_id: r.try_get("user_id")?,
                name: r.try_get("name")?,
            }),
            None => None,
        })
    }

    async fn create_batch(
        &self,
        project: &Project,
        user_id: Uuid,
        assets: &[Asset],
    ) -> Result<(Batch, Vec<Photo>), StoreError> {
        let mut tx = self.pool.begin().await?;

        let batch_row = sqlx::query(&format!(
            r#"
            INSERT INTO batches (id, project_id, user_id, status, counts_queued)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {BATCH_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(project.id)
        .bind(user_id)
        .bind(BatchStatus::Queued.to_string())
        .bind(assets.len() as i32)
        .fetch_one(&mut *tx)
        .await?;
        let batch = batch_from_row(&batch_row)?;

        let mut photos = Vec::with_capacity(assets.len());
        for asset in assets {
            let row = sqlx::query(&format!(
                r#"
                INSERT INTO photos (id, batch_id, project_id, filename, file_path, url, room_type, checksum, status)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                RETURNING {PHOTO_COLUMNS}
                "#
            ))
            .bind(Uuid::new_v4())
            .bind(batch.id)
            .bind(project.id)
            .bind(&asset.filename)
            .bind(&asset.file_path)
            .bind(&asset.url)
            .bind(&asset.room_type)
            .bind(&asset.checksum)
            .bind(PhotoStatus::Pending.to_string())
            .fetch_one(&mut *tx)
            .await?;
            photos.push(photo_from_row(&row)?);
        }

        tx.commit().await?;
        Ok((batch, photos))
    }

    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<Batch>, StoreError> {
        let row = sqlx::query(&format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = $1"))
            .bind(batch_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(batch_from_row).transpose()
    }

    async fn get_photo(&self, photo_id: Uuid) -> Result<Option<Photo>, StoreError> {
        let row = sqlx::query(&format!("SELECT {PHOTO_COLUMNS} FROM photos WHERE id = $1"))
            .bind(photo_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(photo_from_row).transpose()
    }

    async fn list_batch_photos(&self, batch_id: Uuid) -> Result<Vec<Photo>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PHOTO_COLUMNS} FROM photos WHERE batch_id = $1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(photo_from_row).collect()
    }

    async fn list_done_photos(
        &self,
        project_id: Uuid,
        batch_id: Option<Uuid>,
    ) -> Result<Vec<Photo>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PHOTO_COLUMNS}
            FROM photos
            WHERE project_id = $1
              AND status = 'DONE'
              AND analysis IS NOT NULL
              AND ($2::uuid IS NULL OR batch_id = $2)
            ORDER BY created_at ASC
            "#
        ))
        .bind(project_id)
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(photo_from_row).collect()
    }

    async fn claim_photo(&self, photo_id: Uuid, force: bool) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE photos
            SET status = 'PROCESSING',
                error_code = NULL,
                error_message = NULL
            WHERE id = $1
              AND (status <> 'DONE' OR $2)
            "#,
        )
        .bind(photo_id)
        .bind(force)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn complete_photo(
        &self,
        photo_id: Uuid,
        room_type: Option<&str>,
        analysis: &PhotoAnalysis,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE photos
            SET status = 'DONE',
                room_type = COALESCE($2, room_type),
                analysis = $3,
                error_code = NULL,
                error_message = NULL,
                processed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(photo_id)
        .bind(room_type)
        .bind(Json(analysis))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fail_photo(
        &self,
        photo_id: Uuid,
        error: &ClassifiedError,
        terminal: bool,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE photos
            SET status = CASE WHEN $4 THEN 'ERROR' ELSE status END,
                error_code = $2,
                error_message = $3,
                processed_at = CASE WHEN $4 THEN NOW() ELSE processed_at END
            WHERE id = $1
            "#,
        )
        .bind(photo_id)
        .bind(error.code.to_string())
        .bind(&error.message)
        .bind(terminal)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn refresh_batch_counts(&self, batch_id: Uuid) -> Result<Batch, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes concurrent recounts of the same batch.
        let locked = sqlx::query("SELECT status FROM batches WHERE id = $1 FOR UPDATE")
            .bind(batch_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("batch {batch_id}")))?;
        let current_text: String = locked.try_get("status")?;
        let current = parse_text::<BatchStatus>("batch status", &current_text)?;

        let rows = sqlx::query(
            "SELECT status, COUNT(*)::INT AS n FROM photos WHERE batch_id = $1 GROUP BY status",
        )
        .bind(batch_id)
        .fetch_all(&mut *tx)
        .await?;

        let mut counts = BatchCounts::default();
        for row in &rows {
            let status: String = row.try_get("status")?;
            counts.add(parse_text("photo status", &status)?, count(row, "n")?);
        }
        let status = counts.derive_status(current);

        let row = sqlx::query(&format!(
            r#"
            UPDATE batches
            SET status = $2,
                counts_queued = $3,
                counts_processing = $4,
                counts_completed = $5,
                counts_failed = $6,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {BATCH_COLUMNS}
            "#
        ))
        .bind(batch_id)
        .bind(status.to_string())
        .bind(counts.queued as i32)
        .bind(counts.processing as i32)
        .bind(counts.completed as i32)
        .bind(counts.failed as i32)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        batch_from_row(&row)
    }

    async fn latch_inventory_sync(&self, batch_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE batches
            SET inventory_queued = TRUE,
                updated_at = NOW()
            WHERE id = $1
              AND inventory_queued = FALSE
              AND counts_queued = 0
              AND counts_processing = 0
            "#,
        )
        .bind(batch_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_ai_call(&self, record: &AiCallRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO ai_call_metrics
                (provider, model, operation, latency_ms, success, error_type, retries, meta)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&record.provider)
        .bind(&record.model)
        .bind(record.operation.to_string())
        .bind(record.latency_ms as i64)
        .bind(record.success)
        .bind(record.error_type.map(|code| code.to_string()))
        .bind(record.retries as i32)
        .bind(Json(&record.meta))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
