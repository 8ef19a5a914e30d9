//! Dashboard API endpoints.
//!
//! A school session opens a dashboard; the client then reads it on its own
//! schedule and plays a sound whenever `cueCount` grows.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use super::{error, success, ApiResult};
use crate::auth::CurrentSession;
use crate::dashboard::DashboardSnapshot;
use crate::models::PickupRequest;
use crate::AppState;

/// Request body naming the pickup request a dashboard action applies to.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardActionRequest {
    pub request_id: String,
}

/// POST /api/dashboards - Open a dashboard for the session's school.
pub async fn open_dashboard(
    State(state): State<AppState>,
    session: CurrentSession,
) -> ApiResult<DashboardSnapshot> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let school = match session.school() {
        Ok(school) => school,
        Err(e) => return error(e, revision_id),
    };

    match state.dashboards.open(&school.id).await {
        Ok(snapshot) => success(snapshot, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/dashboards/{id} - Current dashboard view.
pub async fn get_dashboard(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<DashboardSnapshot> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.dashboards.snapshot(&id) {
        Ok(snapshot) => success(snapshot, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/dashboards/{id}/audio - The user interacted; sound may play.
pub async fn unlock_dashboard_audio(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<DashboardSnapshot> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.dashboards.unlock_audio(&id) {
        Ok(snapshot) => success(snapshot, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/dashboards/{id}/dismiss - Hide the notification.
pub async fn dismiss_dashboard_notification(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<DashboardSnapshot> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.dashboards.dismiss(&id) {
        Ok(snapshot) => success(snapshot, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/dashboards/{id}/acknowledge - Acknowledge a request from the dashboard.
pub async fn acknowledge_from_dashboard(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<DashboardActionRequest>,
) -> ApiResult<PickupRequest> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.dashboards.acknowledge(&id, &request.request_id).await {
        Ok(updated) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(updated, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/dashboards/{id}/process - Hand the child over and remove the request.
pub async fn process_from_dashboard(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<DashboardActionRequest>,
) -> ApiResult<()> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.dashboards.process(&id, &request.request_id).await {
        Ok(()) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success((), new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// DELETE /api/dashboards/{id} - Close a dashboard and stop its timers.
pub async fn close_dashboard(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.dashboards.close(&id) {
        Ok(()) => success((), revision_id),
        Err(e) => error(e, revision_id),
    }
}
