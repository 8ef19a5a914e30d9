//! Pickup request model matching the frontend PickupRequest interface.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a pickup request.
///
/// The intended flow is `Pending -> Acknowledged -> Completed`, or
/// `Pending -> Completed` directly. The status setter does not enforce it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PickupStatus {
    #[default]
    Pending,
    Acknowledged,
    Completed,
}

impl PickupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PickupStatus::Pending => "pending",
            PickupStatus::Acknowledged => "acknowledged",
            PickupStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PickupStatus::Pending),
            "acknowledged" => Some(PickupStatus::Acknowledged),
            "completed" => Some(PickupStatus::Completed),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            PickupStatus::Pending => 0,
            PickupStatus::Acknowledged => 1,
            PickupStatus::Completed => 2,
        }
    }

    /// True when moving from `self` to `next` goes backwards in the lifecycle.
    pub fn is_regression_to(&self, next: PickupStatus) -> bool {
        next.rank() < self.rank()
    }
}

/// A parent-initiated request to release a child from school care.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PickupRequest {
    pub id: String,
    pub child_id: String,
    pub child_name: String,
    pub child_class: String,
    pub parent_id: String,
    pub parent_name: String,
    pub parent_phone: String,
    pub pickup_time: String,
    pub request_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub status: PickupStatus,
    pub school_id: String,
    /// Internal version for optimistic concurrency control
    #[serde(default)]
    pub version: i64,
}

impl PickupRequest {
    pub fn is_pending(&self) -> bool {
        self.status == PickupStatus::Pending
    }
}

/// Request body for creating (or overwriting) a pickup request.
///
/// When `id` names an existing request, that request is replaced.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePickupRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub child_id: String,
    pub child_name: String,
    pub child_class: String,
    pub parent_id: String,
    pub parent_name: String,
    pub parent_phone: String,
    pub pickup_time: String,
    pub request_time: String,
    #[serde(default)]
    pub note: Option<String>,
    pub school_id: String,
}

/// Request body for a parent asking to pick up one of their own children.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildPickupRequest {
    pub child_id: String,
    #[serde(default)]
    pub note: Option<String>,
}

/// Request body for changing the status of a pickup request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub status: PickupStatus,
    /// Expected version for optimistic concurrency control
    #[serde(default)]
    pub expected_version: Option<i64>,
}
