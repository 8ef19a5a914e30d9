//! Pickup request API endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{error, success, ApiResult};
use crate::auth::CurrentSession;
use crate::errors::AppError;
use crate::models::{ChildPickupRequest, CreatePickupRequest, PickupRequest, UpdateStatusRequest};
use crate::AppState;

/// GET /api/pickup-requests - List all pickup requests.
pub async fn list_pickup_requests(State(state): State<AppState>) -> ApiResult<Vec<PickupRequest>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_pickup_requests().await {
        Ok(requests) => success(requests, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/pickup-requests/{id} - Get a single pickup request.
pub async fn get_pickup_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<PickupRequest> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.get_pickup_request(&id).await {
        Ok(Some(request)) => success(request, revision_id),
        Ok(None) => error(
            AppError::NotFound(format!("Pickup request {} not found", id)),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/pickup-requests - Create a pending request, or overwrite the one with the same id.
pub async fn create_pickup_request(
    State(state): State<AppState>,
    Json(request): Json<CreatePickupRequest>,
) -> ApiResult<PickupRequest> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.save_pickup_request(&request).await {
        Ok(saved) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(saved, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/pickup-requests/child - A logged-in parent asks to pick up one of their children.
pub async fn create_child_pickup_request(
    State(state): State<AppState>,
    session: CurrentSession,
    Json(request): Json<ChildPickupRequest>,
) -> ApiResult<PickupRequest> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let parent = match session.parent() {
        Ok(parent) => parent,
        Err(e) => return error(e, revision_id),
    };

    match state.repo.create_child_pickup(parent, &request).await {
        Ok(saved) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(saved, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// PUT /api/pickup-requests/{id}/status - Overwrite a request's status.
pub async fn update_pickup_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateStatusRequest>,
) -> ApiResult<PickupRequest> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state
        .repo
        .set_pickup_status(&id, request.status, request.expected_version)
        .await
    {
        Ok(updated) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(updated, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// DELETE /api/pickup-requests/{id} - Delete a pickup request.
pub async fn delete_pickup_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.delete_pickup_request(&id).await {
        Ok(()) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success((), new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}
