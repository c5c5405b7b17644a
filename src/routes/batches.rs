use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use std::path::PathBuf;
use uuid::Uuid;

use super::auth::{require_owner, UserId};
use super::ApiError;
use crate::app_state::AppState;
use crate::models::api::{BatchCreatedResponse, BatchUploadForm, CreatedPhoto};
use crate::models::batch::BatchProgress;
use crate::models::photo::Asset;

const PHOTO_FIELD: &str = "photos";
const ROOM_TYPE_FIELD: &str = "room_type";

/// POST /api/v1/projects/{project_id}/batches
///
/// Stores the uploaded photos and queues one analysis job per photo.
pub async fn create_batch(
    State(state): State<AppState>,
    user: UserId,
    Path(project_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<BatchCreatedResponse>), ApiError> {
    require_owner(state.store.get_project(project_id).await?, user)?;

    let mut form = BatchUploadForm::default();
    let mut uploads: Vec<(String, Vec<u8>, &'static str)> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        match field.name() {
            Some(PHOTO_FIELD) => {
                let filename = field.file_name().unwrap_or("photo").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;

                let format = image::guess_format(&data)
                    .map_err(|_| ApiError::UnsupportedMedia(format!("{filename} is not a supported image")))?;
                let extension = format.extensions_str().first().copied().unwrap_or("img");
                uploads.push((filename, data.to_vec(), extension));
            }
            Some(ROOM_TYPE_FIELD) => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                let text = text.trim();
                form.room_type = (!text.is_empty()).then(|| text.to_string());
            }
            _ => {}
        }
    }

    form.validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    if uploads.is_empty() {
        return Err(ApiError::Validation("at least one photo is required".to_string()));
    }

    let project_dir = state.upload_dir.join(project_id.to_string());
    tokio::fs::create_dir_all(&project_dir)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to create upload directory: {e}")))?;

    let mut assets = Vec::with_capacity(uploads.len());
    let mut written: Vec<PathBuf> = Vec::with_capacity(uploads.len());
    for (filename, data, extension) in &uploads {
        let stored_name = format!("{}.{}", Uuid::new_v4(), extension);
        let path = project_dir.join(&stored_name);
        if let Err(e) = tokio::fs::write(&path, data).await {
            remove_files(&written).await;
            return Err(ApiError::Internal(format!("failed to store {filename}: {e}")));
        }
        written.push(path);

        // Relative to the upload directory.
        let relative = format!("{project_id}/{stored_name}");
        assets.push(Asset::from_upload(filename.clone(), relative, data).with_room_type(form.room_type.clone()));
    }

    let (batch, photos) = match state.aggregator.create_batch(project_id, user.0, &assets).await {
        Ok(created) => created,
        Err(e) => {
            remove_files(&written).await;
            return Err(e.into());
        }
    };

    let jobs_enqueued = state.aggregator.enqueue_photos(&batch, &photos, user.0).await?;

    tracing::info!(
        batch_id = %batch.id,
        project_id = %project_id,
        photos = photos.len(),
        jobs_enqueued,
        "Batch submitted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(BatchCreatedResponse {
            batch_id: batch.id,
            status: batch.status,
            photos: photos
                .iter()
                .map(|p| CreatedPhoto {
                    id: p.id,
                    filename: p.filename.clone(),
                })
                .collect(),
            jobs_enqueued,
        }),
    ))
}

/// GET /api/v1/batches/{batch_id}
pub async fn batch_progress(
    State(state): State<AppState>,
    user: UserId,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<BatchProgress>, ApiError> {
    let batch = state
        .store
        .get_batch(batch_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("batch {batch_id}")))?;
    if batch.user_id != user.0 {
        require_owner(state.store.get_project(batch.project_id).await?, user)?;
    }

    let progress = state.aggregator.compute_batch_progress(batch_id).await?;
    Ok(Json(progress))
}

async fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove orphaned upload");
        }
    }
}
