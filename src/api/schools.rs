//! School API endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::models::{CreateSchoolRequest, ParentOverview, PickupRequest, School};
use crate::AppState;

/// GET /api/schools - List all schools.
pub async fn list_schools(State(state): State<AppState>) -> ApiResult<Vec<School>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_schools().await {
        Ok(schools) => success(schools, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/schools - Add a school.
pub async fn create_school(
    State(state): State<AppState>,
    Json(request): Json<CreateSchoolRequest>,
) -> ApiResult<School> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if request.name.trim().is_empty() || request.code.trim().is_empty() {
        return error(
            AppError::Validation("School name and code are required".to_string()),
            revision_id,
        );
    }

    let school = School {
        id: request
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        name: request.name.trim().to_string(),
        code: request.code.trim().to_string(),
    };

    match state.repo.add_school(&school).await {
        Ok(school) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(school, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/schools/code/{code} - Resolve a school code.
pub async fn get_school_by_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<School> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.find_school_by_code(&code).await {
        Ok(Some(school)) => success(school, revision_id),
        Ok(None) => error(
            AppError::NotFound(format!("School code {} not found", code)),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/schools/{id}/pickup-requests - List a school's requests in insertion order.
pub async fn list_school_pickup_requests(
    State(state): State<AppState>,
    Path(school_id): Path<String>,
) -> ApiResult<Vec<PickupRequest>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_pickup_requests_by_school(&school_id).await {
        Ok(requests) => success(requests, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/schools/{id}/parents - Parents of a school with their request history.
pub async fn list_school_parents(
    State(state): State<AppState>,
    Path(school_id): Path<String>,
) -> ApiResult<Vec<ParentOverview>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.parent_overviews(&school_id).await {
        Ok(parents) => success(parents, revision_id),
        Err(e) => error(e, revision_id),
    }
}
