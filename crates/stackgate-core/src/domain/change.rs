//! Planned and applied changes against a deployment target.

use serde::{Deserialize, Serialize};

use super::credential::{RequiredPermission, ResourceAction};

/// A resource as it currently exists in a target environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeployedResource {
    pub logical_id: String,
    pub resource_type: String,
    /// Digest of the template revision that last touched this resource.
    #[serde(default)]
    pub revision: Option<String>,
}

/// A single mutation the executor intends to perform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PlannedChange {
    pub action: ResourceAction,
    pub logical_id: String,
    pub resource_type: String,
}

impl PlannedChange {
    pub fn new(
        action: ResourceAction,
        logical_id: impl Into<String>,
        resource_type: impl Into<String>,
    ) -> Self {
        Self {
            action,
            logical_id: logical_id.into(),
            resource_type: resource_type.into(),
        }
    }

    pub fn required_permission(&self) -> RequiredPermission {
        RequiredPermission::new(self.action, self.resource_type.clone())
    }
}

impl std::fmt::Display for PlannedChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({})", self.action, self.logical_id, self.resource_type)
    }
}

/// Status a target reports for an applied change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ChangeStatus {
    Complete,
    InProgress,
    Failed(String),
    Unknown,
}

impl ChangeStatus {
    /// Whether the status needs another poll before it can be trusted.
    pub fn is_pending(&self) -> bool {
        matches!(self, ChangeStatus::InProgress | ChangeStatus::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::Complete => "complete",
            ChangeStatus::InProgress => "in_progress",
            ChangeStatus::Failed(_) => "failed",
            ChangeStatus::Unknown => "unknown",
        }
    }
}

/// Summary of a completed deployment, recorded on the execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeployOutcome {
    pub environment: String,
    pub applied: Vec<PlannedChange>,
}

impl DeployOutcome {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}
