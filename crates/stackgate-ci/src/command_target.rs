//! Deployment target backed by an external CLI that speaks JSON.
//!
//! The configured command is invoked with a subcommand appended:
//!
//! ```text
//! <command...> deployed
//!     -> [{"logical_id": "...", "resource_type": "...", "revision": "..."}]
//! <command...> apply <action> <logical_id> <resource_type> <template_path> <digest>
//!     -> {"status": "complete" | "in_progress" | "unknown"}
//!        {"status": "failed", "reason": "..."}
//! <command...> poll <action> <logical_id> <resource_type>
//!     -> same shape as apply
//! ```
//!
//! A non-zero exit is a target error; it never counts as a change status.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use stackgate_core::{Artifact, ChangeStatus, DeployedResource, PlannedChange};
use tracing::debug;

use crate::deploy::{DeployError, DeployResult, DeploymentTarget};
use crate::runner::{StagedTemplate, ToolRunner};

pub struct CommandTarget {
    environment: String,
    command: Vec<String>,
    call_timeout_secs: u64,
}

impl CommandTarget {
    pub fn new(
        environment: impl Into<String>,
        command: Vec<String>,
        call_timeout_secs: u64,
    ) -> Self {
        Self {
            environment: environment.into(),
            command,
            call_timeout_secs,
        }
    }

    async fn call<T: DeserializeOwned>(&self, args: &[&str]) -> DeployResult<T> {
        let mut argv = self.command.clone();
        argv.extend(args.iter().map(|a| a.to_string()));
        debug!(environment = %self.environment, command = ?argv, "calling deployment target");

        let output = ToolRunner::run(&argv, self.call_timeout_secs)
            .await
            .map_err(|e| DeployError::Target(e.to_string()))?;
        if !output.succeeded() {
            return Err(DeployError::Target(format!(
                "{} exited with {:?}: {}",
                args.first().copied().unwrap_or_default(),
                output.exit_code,
                output.stderr.trim()
            )));
        }
        serde_json::from_str(output.stdout.trim())
            .map_err(|e| DeployError::Target(format!("unreadable target response: {}", e)))
    }
}

#[async_trait]
impl DeploymentTarget for CommandTarget {
    fn environment(&self) -> &str {
        &self.environment
    }

    async fn deployed(&self) -> DeployResult<Vec<DeployedResource>> {
        self.call(&["deployed"]).await
    }

    async fn apply(
        &self,
        change: &PlannedChange,
        artifact: &Artifact,
    ) -> DeployResult<ChangeStatus> {
        let staged = StagedTemplate::write(artifact)
            .map_err(|e| DeployError::Target(format!("failed to stage template: {}", e)))?;
        let path = staged.path_str();
        self.call(&[
            "apply",
            change.action.as_str(),
            change.logical_id.as_str(),
            change.resource_type.as_str(),
            path.as_str(),
            artifact.digest().as_str(),
        ])
        .await
    }

    async fn poll(&self, change: &PlannedChange) -> DeployResult<ChangeStatus> {
        self.call(&[
            "poll",
            change.action.as_str(),
            change.logical_id.as_str(),
            change.resource_type.as_str(),
        ])
        .await
    }
}
