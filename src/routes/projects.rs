use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;

use super::auth::UserId;
use super::ApiError;
use crate::app_state::AppState;
use crate::models::api::CreateProjectRequest;
use crate::models::project::Project;

/// POST /api/v1/projects
pub async fn create_project(
    State(state): State<AppState>,
    user: UserId,
    Json(request): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<Project>), ApiError> {
    request
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let project = state.store.create_project(user.0, request.name.trim()).await?;
    tracing::info!(project_id = %project.id, user_id = %user.0, "Project created");
    Ok((StatusCode::CREATED, Json(project)))
}
