use axum::extract::{Path, Query, State};
use axum::Json;
use uuid::Uuid;

use super::auth::{require_owner, UserId};
use super::ApiError;
use crate::app_state::AppState;
use crate::models::api::InventoryQuery;
use crate::models::inventory::InventorySummary;
use crate::models::job::InventorySyncJob;

/// GET /api/v1/projects/{project_id}/inventory
pub async fn project_inventory(
    State(state): State<AppState>,
    user: UserId,
    Path(project_id): Path<Uuid>,
    Query(query): Query<InventoryQuery>,
) -> Result<Json<InventorySummary>, ApiError> {
    require_owner(state.store.get_project(project_id).await?, user)?;

    if let Some(batch_id) = query.batch_id {
        let in_project = state
            .store
            .get_batch(batch_id)
            .await?
            .is_some_and(|b| b.project_id == project_id);
        if !in_project {
            return Err(ApiError::NotFound(format!("batch {batch_id}")));
        }
    }

    let summary = state
        .inventory
        .sync(&InventorySyncJob {
            project_id,
            user_id: user.0,
            batch_id: query.batch_id,
        })
        .await?;
    Ok(Json(summary))
}
