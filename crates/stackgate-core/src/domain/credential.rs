//! Deployment credentials and the permission check performed before any
//! mutation of a live environment.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A mutating action the executor may perform on a resource.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ResourceAction {
    Create,
    Update,
    Delete,
}

impl ResourceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceAction::Create => "create",
            ResourceAction::Update => "update",
            ResourceAction::Delete => "delete",
        }
    }
}

impl fmt::Display for ResourceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One grant: a set of actions allowed on a set of resource types.
///
/// `"*"` in `resource_types` matches every type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Grant {
    pub actions: Vec<ResourceAction>,
    pub resource_types: Vec<String>,
}

impl Grant {
    pub fn new(actions: Vec<ResourceAction>, resource_types: Vec<String>) -> Self {
        Self {
            actions,
            resource_types,
        }
    }

    fn covers(&self, required: &RequiredPermission) -> bool {
        self.actions.contains(&required.action)
            && self
                .resource_types
                .iter()
                .any(|t| t == "*" || t == &required.resource_type)
    }
}

/// An `(action, resource type)` pair a deployment needs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequiredPermission {
    pub action: ResourceAction,
    pub resource_type: String,
}

impl RequiredPermission {
    pub fn new(action: ResourceAction, resource_type: impl Into<String>) -> Self {
        Self {
            action,
            resource_type: resource_type.into(),
        }
    }
}

impl fmt::Display for RequiredPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action, self.resource_type)
    }
}

/// Scoped authority to mutate a target environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentCredential {
    pub name: String,
    #[serde(default)]
    pub grants: Vec<Grant>,
}

impl DeploymentCredential {
    pub fn new(name: impl Into<String>, grants: Vec<Grant>) -> Self {
        Self {
            name: name.into(),
            grants,
        }
    }

    pub fn permits(&self, required: &RequiredPermission) -> bool {
        self.grants.iter().any(|g| g.covers(required))
    }

    /// Every required permission this credential does not cover, sorted and
    /// de-duplicated.
    pub fn missing<'a, I>(&self, required: I) -> Vec<RequiredPermission>
    where
        I: IntoIterator<Item = &'a RequiredPermission>,
    {
        required
            .into_iter()
            .filter(|r| !self.permits(r))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Permissions any deployment of the given resource types needs regardless
/// of the change plan: create, plus delete so a failed rollout can be torn
/// down.
pub fn baseline_permissions<'a, I>(resource_types: I) -> Vec<RequiredPermission>
where
    I: IntoIterator<Item = &'a str>,
{
    resource_types
        .into_iter()
        .flat_map(|t| {
            [
                RequiredPermission::new(ResourceAction::Create, t),
                RequiredPermission::new(ResourceAction::Delete, t),
            ]
        })
        .collect()
}
