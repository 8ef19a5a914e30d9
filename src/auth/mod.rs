//! Request authentication.
//!
//! Two independent checks: an optional deployment key on every `/api` call
//! (compared in constant time), and per-user sessions carried as bearer
//! tokens. Sessions only identify the caller; no password is ever verified.

use axum::{
    extract::{FromRequestParts, Request},
    http::{header, request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use subtle::ConstantTimeEq;

use crate::errors::{codes, AppError, AppErrorWithRevision, ErrorDetails, ErrorResponse};
use crate::models::{ParentUser, SchoolUser, Session, User};
use crate::AppState;

/// Header name for the deployment key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Deployment key layer. With no key configured every request passes.
pub async fn psk_auth_layer(
    expected_psk: Option<String>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = expected_psk else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    match provided {
        Some(key) if constant_time_compare(key, &expected) => next.run(request).await,
        Some(_) => unauthorized_response("Invalid API key"),
        None => unauthorized_response("Missing API key"),
    }
}

/// Perform constant-time string comparison.
fn constant_time_compare(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Create an unauthorized response.
fn unauthorized_response(message: &str) -> Response {
    let body = ErrorResponse {
        success: false,
        error: ErrorDetails {
            code: codes::UNAUTHORIZED.to_string(),
            message: message.to_string(),
            details: None,
        },
        revision_id: 0,
    };

    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

/// Extract the bearer token from the `Authorization` header.
pub fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// The session of the caller, resolved from its bearer token.
#[derive(Debug, Clone)]
pub struct CurrentSession(pub Session);

impl FromRequestParts<AppState> for CurrentSession {
    type Rejection = AppErrorWithRevision;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

        let token = bearer_token(parts).ok_or_else(|| {
            AppError::Unauthorized("Missing session token".to_string()).at_revision(revision_id)
        })?;

        match state.repo.get_session(token).await {
            Ok(Some(session)) => Ok(CurrentSession(session)),
            Ok(None) => Err(AppError::Unauthorized("Unknown session".to_string())
                .at_revision(revision_id)),
            Err(e) => Err(e.at_revision(revision_id)),
        }
    }
}

impl CurrentSession {
    /// The session's parent account, or a validation error for school sessions.
    pub fn parent(&self) -> Result<&ParentUser, AppError> {
        match &self.0.user {
            User::Parent(parent) => Ok(parent),
            User::School(_) => Err(AppError::Validation(
                "This action requires a parent account".to_string(),
            )),
        }
    }

    /// The session's school account, or a validation error for parent sessions.
    pub fn school(&self) -> Result<&SchoolUser, AppError> {
        match &self.0.user {
            User::School(school) => Ok(school),
            User::Parent(_) => Err(AppError::Validation(
                "This action requires a school account".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http, middleware, routing::get, Router};
    use tower::ServiceExt;

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("test-key-123", "test-key-123"));
        assert!(!constant_time_compare("test-key-123", "test-key-124"));
        assert!(!constant_time_compare("short", "much-longer-key"));
        assert!(constant_time_compare("", ""));
    }

    #[test]
    fn test_bearer_token_parsing() {
        let (mut parts, _) = http::Request::builder()
            .header(header::AUTHORIZATION, "Bearer abc-123")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(bearer_token(&parts), Some("abc-123"));

        parts
            .headers
            .insert(header::AUTHORIZATION, "Basic xyz".parse().unwrap());
        assert_eq!(bearer_token(&parts), None);
    }

    fn guarded(psk: Option<&str>) -> Router {
        let psk = psk.map(str::to_string);
        Router::new()
            .route("/ping", get(|| async { "pong" }))
            .layer(middleware::from_fn(move |req, next| {
                psk_auth_layer(psk.clone(), req, next)
            }))
    }

    #[tokio::test]
    async fn test_layer_open_without_key() {
        let resp = guarded(None)
            .oneshot(http::Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_layer_checks_key() {
        let missing = guarded(Some("k1"))
            .oneshot(http::Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = guarded(Some("k1"))
            .oneshot(
                http::Request::builder()
                    .uri("/ping")
                    .header(API_KEY_HEADER, "k2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let ok = guarded(Some("k1"))
            .oneshot(
                http::Request::builder()
                    .uri("/ping")
                    .header(API_KEY_HEADER, "k1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
    }
}
