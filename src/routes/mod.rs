pub mod auth;
pub mod batches;
pub mod health;
pub mod inventory;
pub mod metrics;
pub mod photos;
pub mod projects;
pub mod queues;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::app_state::AppState;
use crate::db::StoreError;
use crate::services::batch::BatchError;
use crate::services::inventory::InventoryError;
use crate::services::queue::QueueError;

/// Largest accepted batch upload.
pub const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// API routes without the metrics endpoint or outer layers.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/projects", post(projects::create_project))
        .route(
            "/api/v1/projects/{project_id}/batches",
            post(batches::create_batch).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route(
            "/api/v1/projects/{project_id}/inventory",
            get(inventory::project_inventory),
        )
        .route("/api/v1/batches/{batch_id}", get(batches::batch_progress))
        .route("/api/v1/photos/{photo_id}/analyze", post(photos::analyze_photo))
        .route("/api/v1/queues", get(queues::queue_stats))
        .with_state(state)
}

/// Error returned by every API handler.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing or malformed x-user-id header")]
    Unauthenticated,

    #[error("not allowed to access this resource")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    UnsupportedMedia(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::UnsupportedMedia(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ApiError::NotFound(what),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        ApiError::Unavailable(e.to_string())
    }
}

impl From<BatchError> for ApiError {
    fn from(e: BatchError) -> Self {
        match e {
            BatchError::NotFound(what) => ApiError::NotFound(what),
            BatchError::Unauthorized => ApiError::Forbidden,
            BatchError::EmptyBatch => ApiError::Validation(BatchError::EmptyBatch.to_string()),
            BatchError::Validation(msg) => ApiError::Validation(msg),
            BatchError::Store(e) => e.into(),
            BatchError::Queue(e) => e.into(),
        }
    }
}

impl From<InventoryError> for ApiError {
    fn from(e: InventoryError) -> Self {
        match e {
            InventoryError::Store(e) => e.into(),
        }
    }
}
