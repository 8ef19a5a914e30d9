//! Session model replacing the ambient "current user" entry.

use serde::{Deserialize, Serialize};

use super::{User, UserRole};

/// A logged-in session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub user: User,
    pub created_at: String,
}

/// Request body for logging in.
///
/// No credential check is performed; a `password` field, if sent, is ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub identifier: String,
    pub role: UserRole,
}
