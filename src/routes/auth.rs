use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use super::ApiError;
use crate::models::project::Project;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Caller identity taken from the `x-user-id` header.
///
/// Authentication happens upstream; this only reads the resolved id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub Uuid);

impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|h| h.to_str().ok())
            .ok_or(ApiError::Unauthenticated)?;

        Uuid::parse_str(raw.trim())
            .map(UserId)
            .map_err(|_| ApiError::Unauthenticated)
    }
}

/// 404 for a missing project, 403 for someone else's.
pub fn require_owner(project: Option<Project>, user: UserId) -> Result<Project, ApiError> {
    let project = project.ok_or_else(|| ApiError::NotFound("project".to_string()))?;
    if !project.is_owned_by(user.0) {
        return Err(ApiError::Forbidden);
    }
    Ok(project)
}
