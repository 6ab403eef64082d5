//! Canonical data model shared across the connector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A provider group, identified by its provider-assigned id.
///
/// Two refs denote the same group exactly when their ids match; the name is
/// descriptive only and may drift between sync cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRef {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl GroupRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Identity comparison: id only.
    pub fn same_group(&self, other: &GroupRef) -> bool {
        self.id == other.id
    }
}

/// Application lifecycle status, parsed leniently from the provider's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Active,
    Inactive,
    Unknown,
}

impl ApplicationStatus {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.to_ascii_uppercase()) {
            Some(s) if s == "ACTIVE" => ApplicationStatus::Active,
            Some(s) if s == "INACTIVE" => ApplicationStatus::Inactive,
            _ => ApplicationStatus::Unknown,
        }
    }
}

/// A normalized application record from the provider's inventory.
///
/// Cycle-scoped snapshot; the provider-assigned id is the identity key, so
/// re-ingesting a record after page redelivery overwrites rather than
/// duplicates downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub label: String,
    pub status: ApplicationStatus,
    #[serde(default)]
    pub assigned_groups: Vec<GroupRef>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Group membership operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupOp {
    Add,
    Remove,
}

impl fmt::Display for GroupOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupOp::Add => f.write_str("add"),
            GroupOp::Remove => f.write_str("remove"),
        }
    }
}

/// A single membership change to apply. Request-scoped; created per dispatch
/// call and not persisted beyond its retry window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub user_id: String,
    pub group_id: String,
    pub operation: GroupOp,
    /// Dispatching the same key twice has no effect beyond the first
    /// successful application; the dispatcher replays the original ack.
    pub idempotency_key: String,
}

impl ActionRequest {
    pub fn add(user_id: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self::new(user_id, group_id, GroupOp::Add)
    }

    pub fn remove(user_id: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self::new(user_id, group_id, GroupOp::Remove)
    }

    pub fn new(
        user_id: impl Into<String>,
        group_id: impl Into<String>,
        operation: GroupOp,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            group_id: group_id.into(),
            operation,
            idempotency_key: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = key.into();
        self
    }
}

/// Acknowledgment of an applied (or no-op'd) membership action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    /// The idempotency key of the request this ack answers.
    pub action_id: String,
    pub user_id: String,
    pub group_id: String,
    pub operation: GroupOp,
    /// True when the provider already reflected the desired state and the
    /// call was normalized to success.
    pub no_op: bool,
    pub timestamp: DateTime<Utc>,
}

impl Ack {
    pub fn for_request(request: &ActionRequest, no_op: bool) -> Self {
        Self {
            action_id: request.idempotency_key.clone(),
            user_id: request.user_id.clone(),
            group_id: request.group_id.clone(),
            operation: request.operation,
            no_op,
            timestamp: Utc::now(),
        }
    }
}
