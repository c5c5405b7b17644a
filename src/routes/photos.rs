use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use super::auth::{require_owner, UserId};
use super::ApiError;
use crate::app_state::AppState;
use crate::models::api::{AnalyzeQuery, AnalyzeResponse};
use crate::models::job::PhotoAnalyzeJob;

/// POST /api/v1/photos/{photo_id}/analyze
///
/// Re-submits one photo. Without `force` a DONE photo is skipped by the worker.
///
/// A request that collapses onto a job still live for the photo reports
/// `deduplicated`; when it asked for `force`, the live job would not honor
/// that, so it is rejected with 409 instead.
pub async fn analyze_photo(
    State(state): State<AppState>,
    user: UserId,
    Path(photo_id): Path<Uuid>,
    Query(query): Query<AnalyzeQuery>,
) -> Result<(StatusCode, Json<AnalyzeResponse>), ApiError> {
    let photo = state
        .store
        .get_photo(photo_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("photo {photo_id}")))?;
    require_owner(state.store.get_project(photo.project_id).await?, user)?;

    let job = PhotoAnalyzeJob {
        photo_id,
        user_id: user.0,
        asset_id: None,
        room_type: photo.room_type.clone(),
        batch_id: Some(photo.batch_id),
        force: query.force,
    };
    let handle = state.queue.enqueue_photo_analysis(&job).await?;
    if handle.deduplicated && query.force {
        tracing::warn!(photo_id = %photo_id, job_id = %handle.id, "Forced re-analysis collided with a live job");
        return Err(ApiError::Conflict(format!(
            "photo {photo_id} already has a pending analysis job; retry once it finishes"
        )));
    }

    tracing::info!(
        photo_id = %photo_id,
        force = query.force,
        deduplicated = handle.deduplicated,
        "Photo re-analysis requested"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(AnalyzeResponse {
            photo_id,
            job_id: handle.id,
            deduplicated: handle.deduplicated,
        }),
    ))
}
