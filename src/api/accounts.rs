//! Registration, user and session endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{error, success, ApiResult};
use crate::auth::CurrentSession;
use crate::errors::AppError;
use crate::models::{
    LoginRequest, ParentUser, RegisterParentRequest, RegisterSchoolRequest, SchoolUser, Session,
    User,
};
use crate::AppState;

/// POST /api/register/parent - Register a parent account.
pub async fn register_parent(
    State(state): State<AppState>,
    Json(request): Json<RegisterParentRequest>,
) -> ApiResult<ParentUser> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.register_parent(&request).await {
        Ok(parent) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(parent, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/register/school - Register a school account and its school.
pub async fn register_school(
    State(state): State<AppState>,
    Json(request): Json<RegisterSchoolRequest>,
) -> ApiResult<SchoolUser> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.register_school(&request).await {
        Ok(school) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(school, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/users/{id} - Get a single user.
pub async fn get_user(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<User> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.get_user(&id).await {
        Ok(Some(user)) => success(user, revision_id),
        Ok(None) => error(
            AppError::NotFound(format!("User {} not found", id)),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/sessions - Log in and receive a session token.
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Session> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let identifier = request.identifier.trim();
    if identifier.is_empty() {
        return error(
            AppError::Validation("Identifier is required".to_string()),
            revision_id,
        );
    }

    match state.repo.login(identifier, request.role).await {
        Ok(session) => {
            tracing::info!(user_id = %session.user.id(), role = request.role.as_str(), "Logged in");
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(session, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/sessions/current - The caller's session.
pub async fn current_session(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> ApiResult<Session> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    success(session, revision_id)
}

/// DELETE /api/sessions/current - Log out.
pub async fn logout(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> ApiResult<()> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.delete_session(&session.token).await {
        Ok(()) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success((), new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}
