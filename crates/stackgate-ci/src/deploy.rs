//! Deployment executor: plan, authorize, apply, and poll to resolution.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use stackgate_core::{
    baseline_permissions, obs, Artifact, ChangeStatus, DeployOutcome, DeployedResource,
    DeploymentCredential, PipelineError, PlannedChange, RequiredPermission, ResourceAction,
};
use tracing::{info, warn};

/// Errors from a deployment.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// The credential lacks permissions; nothing was applied.
    #[error("credential {credential} is missing: {}", join_permissions(.missing))]
    PermissionInsufficient {
        credential: String,
        missing: Vec<RequiredPermission>,
    },

    /// A change was rejected or failed on the target.
    #[error("{action} {resource} failed: {reason}")]
    ApplyFailed {
        action: ResourceAction,
        resource: String,
        reason: String,
    },

    /// A change did not settle before the polling ceiling.
    #[error(
        "{action} {resource} did not settle within {waited_secs}s (last status: {last_status})"
    )]
    Timeout {
        action: ResourceAction,
        resource: String,
        waited_secs: u64,
        last_status: String,
    },

    /// The target itself could not be reached or understood.
    #[error("target error: {0}")]
    Target(String),
}

fn join_permissions(missing: &[RequiredPermission]) -> String {
    missing
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<DeployError> for PipelineError {
    fn from(err: DeployError) -> Self {
        match err {
            DeployError::PermissionInsufficient {
                credential,
                missing,
            } => PipelineError::PermissionInsufficient {
                credential,
                missing: join_permissions(&missing),
            },
            DeployError::Timeout {
                action,
                resource,
                waited_secs,
                last_status,
            } => PipelineError::Timeout {
                operation: format!("{} {} (last status: {})", action, resource, last_status),
                elapsed_secs: waited_secs,
            },
            other => PipelineError::Deployment(other.to_string()),
        }
    }
}

pub type DeployResult<T> = std::result::Result<T, DeployError>;

/// The only channel through which the orchestrator mutates an environment.
#[async_trait]
pub trait DeploymentTarget: Send + Sync {
    /// Environment identity; the deploy lock is keyed by this.
    fn environment(&self) -> &str;

    /// Resources currently deployed.
    async fn deployed(&self) -> DeployResult<Vec<DeployedResource>>;

    /// Start a change. May return a pending status.
    async fn apply(&self, change: &PlannedChange, artifact: &Artifact)
        -> DeployResult<ChangeStatus>;

    /// Current status of a previously applied change.
    async fn poll(&self, change: &PlannedChange) -> DeployResult<ChangeStatus>;
}

/// Diff the artifact's declarations against what is deployed.
///
/// Creates and updates come first in logical-id order, removals last.
/// A logical id whose type changed is replaced (delete, then create).
/// Resources already at this artifact's digest are left alone.
pub fn plan_changes(artifact: &Artifact, deployed: &[DeployedResource]) -> Vec<PlannedChange> {
    let current: HashMap<&str, &DeployedResource> = deployed
        .iter()
        .map(|r| (r.logical_id.as_str(), r))
        .collect();
    let desired: BTreeMap<&str, &str> = artifact
        .resources()
        .iter()
        .map(|r| (r.logical_id.as_str(), r.resource_type.as_str()))
        .collect();
    let digest = artifact.digest().as_str();

    let mut plan = Vec::new();
    for (logical_id, resource_type) in &desired {
        match current.get(logical_id) {
            None => plan.push(PlannedChange::new(
                ResourceAction::Create,
                *logical_id,
                *resource_type,
            )),
            Some(existing) if existing.resource_type != *resource_type => {
                plan.push(PlannedChange::new(
                    ResourceAction::Delete,
                    *logical_id,
                    existing.resource_type.clone(),
                ));
                plan.push(PlannedChange::new(
                    ResourceAction::Create,
                    *logical_id,
                    *resource_type,
                ));
            }
            Some(existing) if existing.revision.as_deref() == Some(digest) => {}
            Some(_) => plan.push(PlannedChange::new(
                ResourceAction::Update,
                *logical_id,
                *resource_type,
            )),
        }
    }

    let mut removals: Vec<&DeployedResource> = deployed
        .iter()
        .filter(|r| !desired.contains_key(r.logical_id.as_str()))
        .collect();
    removals.sort();
    plan.extend(removals.into_iter().map(|r| {
        PlannedChange::new(
            ResourceAction::Delete,
            r.logical_id.clone(),
            r.resource_type.clone(),
        )
    }));
    plan
}

/// Every permission a deployment of `artifact` with `plan` needs.
pub fn required_permissions(
    artifact: &Artifact,
    plan: &[PlannedChange],
) -> Vec<RequiredPermission> {
    let mut required = baseline_permissions(artifact.resource_types());
    required.extend(plan.iter().map(PlannedChange::required_permission));
    required.sort();
    required.dedup();
    required
}

/// Executor bounds.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorSettings {
    /// Delay between status polls.
    pub poll_interval: Duration,
    /// Longest a single change may stay pending.
    pub ceiling: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            ceiling: Duration::from_secs(30 * 60),
        }
    }
}

/// Applies an artifact to one target environment.
#[derive(Clone)]
pub struct DeploymentExecutor {
    target: Arc<dyn DeploymentTarget>,
    settings: ExecutorSettings,
}

impl DeploymentExecutor {
    pub fn new(target: Arc<dyn DeploymentTarget>, settings: ExecutorSettings) -> Self {
        Self { target, settings }
    }

    pub fn environment(&self) -> &str {
        self.target.environment()
    }

    /// Converge the environment to `artifact`, or fail explicitly.
    ///
    /// The credential is checked against the whole plan before the first
    /// change is applied.
    pub async fn deploy(
        &self,
        artifact: &Artifact,
        credential: &DeploymentCredential,
    ) -> DeployResult<DeployOutcome> {
        let environment = self.target.environment().to_string();
        let deployed = self.target.deployed().await?;
        let plan = plan_changes(artifact, &deployed);

        let missing = credential.missing(&required_permissions(artifact, &plan));
        if !missing.is_empty() {
            warn!(
                environment = %environment,
                credential = %credential.name,
                missing = %join_permissions(&missing),
                "deployment credential is insufficient"
            );
            return Err(DeployError::PermissionInsufficient {
                credential: credential.name.clone(),
                missing,
            });
        }

        info!(environment = %environment, changes = plan.len(), "applying change plan");
        for change in &plan {
            let status = self.target.apply(change, artifact).await?;
            let status = self.settle(change, status).await?;
            obs::emit_deploy_applied(
                &environment,
                change.action.as_str(),
                &change.logical_id,
                status.as_str(),
            );
        }

        Ok(DeployOutcome {
            environment,
            applied: plan,
        })
    }

    /// Poll a pending change until it completes, fails, or hits the ceiling.
    ///
    /// The change is already in flight, so a failed poll is not an outcome:
    /// it is logged and polling continues. Only the ceiling ends the wait
    /// without a resolved status, and then as an explicit timeout.
    async fn settle(
        &self,
        change: &PlannedChange,
        mut status: ChangeStatus,
    ) -> DeployResult<ChangeStatus> {
        let started = Instant::now();
        let mut last_observed = status.as_str().to_string();
        while status.is_pending() {
            let final_poll = started.elapsed() >= self.settings.ceiling;
            if !final_poll {
                tokio::time::sleep(self.settings.poll_interval).await;
            }
            match self.target.poll(change).await {
                Ok(next) => {
                    last_observed = next.as_str().to_string();
                    status = next;
                }
                Err(err) => {
                    warn!(
                        action = change.action.as_str(),
                        resource = %change.logical_id,
                        error = %err,
                        "status poll failed; retrying"
                    );
                    last_observed = format!("poll error: {err}");
                }
            }
            if final_poll && status.is_pending() {
                return Err(DeployError::Timeout {
                    action: change.action,
                    resource: change.logical_id.clone(),
                    waited_secs: started.elapsed().as_secs(),
                    last_status: last_observed,
                });
            }
        }

        match status {
            ChangeStatus::Failed(reason) => Err(DeployError::ApplyFailed {
                action: change.action,
                resource: change.logical_id.clone(),
                reason,
            }),
            other => Ok(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemoryTarget;
    use stackgate_core::{ResourceDeclaration, SourceRef};

    fn artifact(resources: &[(&str, &str)]) -> Artifact {
        Artifact::with_resources(
            SourceRef::new("org/infra", "main", "abc"),
            "t.yaml",
            b"body".to_vec(),
            resources
                .iter()
                .map(|(id, t)| ResourceDeclaration::new(*id, *t))
                .collect(),
        )
    }

    fn deployed(id: &str, t: &str, revision: Option<&str>) -> DeployedResource {
        DeployedResource {
            logical_id: id.to_string(),
            resource_type: t.to_string(),
            revision: revision.map(str::to_string),
        }
    }

    #[test]
    fn test_plan_against_empty_environment_creates_everything() {
        let a = artifact(&[("Logs", "AWS::S3::Bucket"), ("Jobs", "AWS::SQS::Queue")]);
        let plan = plan_changes(&a, &[]);
        assert_eq!(plan.len(), 2);
        assert!(plan.iter().all(|c| c.action == ResourceAction::Create));
    }

    #[test]
    fn test_plan_updates_removes_and_replaces() {
        let a = artifact(&[
            ("Logs", "AWS::S3::Bucket"),
            ("Jobs", "AWS::SQS::Queue"),
            ("Topic", "AWS::SNS::Topic"),
        ]);
        let current_digest = a.digest().as_str().to_string();
        let env = vec![
            deployed("Logs", "AWS::S3::Bucket", Some("old")),
            deployed("Jobs", "AWS::SQS::Queue", Some(&current_digest)),
            deployed("Topic", "AWS::SQS::Queue", None),
            deployed("Legacy", "AWS::EC2::Instance", None),
        ];
        let plan = plan_changes(&a, &env);
        let rendered: Vec<String> = plan.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "update Logs (AWS::S3::Bucket)",
                "delete Topic (AWS::SQS::Queue)",
                "create Topic (AWS::SNS::Topic)",
                "delete Legacy (AWS::EC2::Instance)",
            ]
        );
    }

    #[test]
    fn test_required_permissions_include_teardown_and_plan() {
        let a = artifact(&[("Logs", "AWS::S3::Bucket")]);
        let plan = vec![
            PlannedChange::new(ResourceAction::Update, "Logs", "AWS::S3::Bucket"),
            PlannedChange::new(ResourceAction::Delete, "Legacy", "AWS::EC2::Instance"),
        ];
        let required: Vec<String> = required_permissions(&a, &plan)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            required,
            vec![
                "create AWS::S3::Bucket",
                "update AWS::S3::Bucket",
                "delete AWS::EC2::Instance",
                "delete AWS::S3::Bucket",
            ]
        );
    }

    #[test]
    fn test_permission_error_maps_to_pipeline_error() {
        let err: PipelineError = DeployError::PermissionInsufficient {
            credential: "deployer".to_string(),
            missing: vec![RequiredPermission::new(
                ResourceAction::Delete,
                "AWS::S3::Bucket",
            )],
        }
        .into();
        assert_eq!(
            err.to_string(),
            "permission insufficient: credential deployer is missing delete AWS::S3::Bucket"
        );
    }

    #[test]
    fn test_timeout_error_names_operation_and_status() {
        let err = DeployError::Timeout {
            action: ResourceAction::Create,
            resource: "Logs".to_string(),
            waited_secs: 30,
            last_status: "in_progress".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "create Logs did not settle within 30s (last status: in_progress)"
        );
    }

    fn executor(target: Arc<MemoryTarget>, ceiling: Duration) -> DeploymentExecutor {
        DeploymentExecutor::new(
            target,
            ExecutorSettings {
                poll_interval: Duration::from_millis(5),
                ceiling,
            },
        )
    }

    fn grant_all() -> DeploymentCredential {
        DeploymentCredential::new(
            "deployer",
            vec![stackgate_core::Grant::new(
                vec![ResourceAction::Create, ResourceAction::Delete],
                vec!["*".to_string()],
            )],
        )
    }

    #[tokio::test]
    async fn test_transient_poll_error_keeps_polling_to_resolution() {
        let target = Arc::new(
            MemoryTarget::new("production")
                .with_statuses(vec![ChangeStatus::InProgress, ChangeStatus::Complete])
                .with_poll_failures(1),
        );
        let outcome = executor(target.clone(), Duration::from_secs(5))
            .deploy(&artifact(&[("Logs", "AWS::S3::Bucket")]), &grant_all())
            .await
            .unwrap();
        assert_eq!(outcome.applied.len(), 1);
        assert_eq!(target.poll_count(), 2);
    }

    #[tokio::test]
    async fn test_polls_failing_past_ceiling_time_out_with_last_error() {
        let target = Arc::new(
            MemoryTarget::new("production")
                .with_statuses(vec![ChangeStatus::InProgress])
                .with_poll_failures(usize::MAX),
        );
        let err = executor(target, Duration::from_millis(30))
            .deploy(&artifact(&[("Logs", "AWS::S3::Bucket")]), &grant_all())
            .await
            .unwrap_err();
        match err {
            DeployError::Timeout { last_status, .. } => {
                assert!(last_status.contains("503 throttled"), "{last_status}");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
