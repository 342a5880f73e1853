//! `stackgate.toml`: pipeline configuration.
//!
//! ```toml
//! repository = "org/infra"
//! template_path = "infra/stack.yaml"
//! repo_dir = "/srv/mirrors/infra"
//!
//! [trigger]
//! push_branch = "main"
//! pull_request_base = "main"
//!
//! [environment]
//! name = "production"
//! conflict = "queue"          # or "reject"
//! max_wait_secs = 900
//!
//! [environment.target]
//! command = ["deployctl", "--stack", "infra"]
//!
//! [credential]
//! name = "deployer"
//! [[credential.grants]]
//! actions = ["create", "update", "delete"]
//! resource_types = ["AWS::S3::Bucket"]
//!
//! [[validators]]
//! name = "lint"
//! kind = "lint"
//!
//! [policy.overrides]
//! rule-scan = "blocking"
//! ```
//!
//! Secrets never live in the file: the webhook secret and status token are
//! read from `STACKGATE_WEBHOOK_SECRET` and `STACKGATE_STATUS_TOKEN`.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stackgate_core::{DeploymentCredential, FailurePolicy};
use stackgate_state::ExecutionStore;

use crate::command_target::CommandTarget;
use crate::deploy::{DeploymentExecutor, ExecutorSettings};
use crate::lock::ConflictPolicy;
use crate::pipeline::{Pipeline, DEFAULT_STATUS_CONTEXT};
use crate::source::GitSource;
use crate::spec::ValidatorSpec;
use crate::status::{HttpStatusReporter, StatusReporter};
use crate::trigger::TriggerListener;

pub const WEBHOOK_SECRET_ENV: &str = "STACKGATE_WEBHOOK_SECRET";
pub const STATUS_TOKEN_ENV: &str = "STACKGATE_STATUS_TOKEN";
pub const DEFAULT_CONFIG_FILE: &str = "stackgate.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn default_repo_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_deploy_timeout_secs() -> u64 {
    30 * 60
}

fn default_call_timeout_secs() -> u64 {
    120
}

fn default_status_context() -> String {
    DEFAULT_STATUS_CONTEXT.to_string()
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TriggerConfig {
    /// Glob over branch names whose pushes deploy.
    #[serde(default = "default_branch")]
    pub push_branch: String,
    /// Glob over pull-request base branches that get validated.
    #[serde(default = "default_branch")]
    pub pull_request_base: String,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            push_branch: default_branch(),
            pull_request_base: default_branch(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetConfig {
    pub command: Vec<String>,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentConfig {
    pub name: String,
    #[serde(default)]
    pub conflict: ConflictPolicy,
    /// Longest a queued deployment waits for the lock; unbounded if unset.
    #[serde(default)]
    pub max_wait_secs: Option<u64>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Ceiling for a single change to settle.
    #[serde(default = "default_deploy_timeout_secs")]
    pub deploy_timeout_secs: u64,
    pub target: TargetConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Validator name -> policy. Only promotion to blocking is accepted.
    #[serde(default)]
    pub overrides: BTreeMap<String, FailurePolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusConfig {
    /// API root of the source-control host; reporting is off when unset.
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default = "default_status_context")]
    pub context: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            api_base: None,
            context: default_status_context(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    /// `owner/name` of the watched repository.
    pub repository: String,
    /// Template path inside the repository.
    pub template_path: String,
    /// Local clone the template is read from.
    #[serde(default = "default_repo_dir")]
    pub repo_dir: PathBuf,
    #[serde(default)]
    pub trigger: TriggerConfig,
    pub environment: EnvironmentConfig,
    pub credential: DeploymentCredential,
    #[serde(default)]
    pub validators: Vec<ValidatorSpec>,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl PipelineConfig {
    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        if config.repo_dir.is_relative() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                config.repo_dir = parent.join(&config.repo_dir);
            }
        }
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would silently weaken the gate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.repository.trim().is_empty() {
            return invalid("repository must not be empty".into());
        }
        if self.environment.name.trim().is_empty() {
            return invalid("environment.name must not be empty".into());
        }
        if self.environment.target.command.is_empty() {
            return invalid("environment.target.command must not be empty".into());
        }
        if self.environment.poll_interval_secs == 0 {
            return invalid("environment.poll_interval_secs must be positive".into());
        }
        if self.validators.is_empty() {
            return invalid("at least one validator is required".into());
        }

        let mut seen = HashSet::new();
        for spec in &self.validators {
            if spec.name.trim().is_empty() {
                return invalid("validator names must not be empty".into());
            }
            if !seen.insert(spec.name.as_str()) {
                return invalid(format!("duplicate validator name {}", spec.name));
            }
            if spec.command.is_empty() && spec.kind.default_command().is_none() {
                return invalid(format!("validator {} has no command", spec.name));
            }
            if spec.timeout_secs == 0 {
                return invalid(format!("validator {} has a zero timeout", spec.name));
            }
        }

        for (name, policy) in &self.policy.overrides {
            if !seen.contains(name.as_str()) {
                return invalid(format!("policy override for unknown validator {name}"));
            }
            if *policy == FailurePolicy::Advisory {
                return invalid(format!(
                    "policy override for {name} would demote it to advisory"
                ));
            }
        }

        for spec in self.resolved_validators() {
            if !spec.enabled && spec.is_blocking() {
                return invalid(format!(
                    "blocking validator {} cannot be disabled",
                    spec.name
                ));
            }
        }
        Ok(())
    }

    /// Validators with default commands filled in and overrides applied.
    pub fn resolved_validators(&self) -> Vec<ValidatorSpec> {
        self.validators
            .iter()
            .cloned()
            .map(|mut spec| {
                if spec.command.is_empty() {
                    spec.command = spec.kind.default_command().unwrap_or_default();
                }
                if let Some(policy) = self.policy.overrides.get(&spec.name) {
                    spec.policy = *policy;
                }
                spec
            })
            .collect()
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            poll_interval: Duration::from_secs(self.environment.poll_interval_secs),
            ceiling: Duration::from_secs(self.environment.deploy_timeout_secs),
        }
    }

    pub fn max_wait(&self) -> Option<Duration> {
        self.environment.max_wait_secs.map(Duration::from_secs)
    }

    pub fn trigger_listener(&self, secret: impl Into<Vec<u8>>) -> TriggerListener {
        TriggerListener::new(
            secret,
            self.trigger.push_branch.clone(),
            self.trigger.pull_request_base.clone(),
        )
        .for_repository(self.repository.clone())
    }

    /// Assemble the pipeline: git source, command target, HTTP reporter.
    pub fn build_pipeline(&self, store: Arc<dyn ExecutionStore>) -> Pipeline {
        let target = CommandTarget::new(
            self.environment.name.clone(),
            self.environment.target.command.clone(),
            self.environment.target.call_timeout_secs,
        );
        let pipeline = Pipeline::new(
            store,
            Arc::new(GitSource::new(
                self.repo_dir.clone(),
                self.template_path.clone(),
            )),
            self.resolved_validators(),
            DeploymentExecutor::new(Arc::new(target), self.executor_settings()),
            self.credential.clone(),
        )
        .with_conflict_policy(self.environment.conflict, self.max_wait());

        match &self.status.api_base {
            Some(api_base) => {
                let reporter: Arc<dyn StatusReporter> =
                    Arc::new(HttpStatusReporter::new(api_base.clone(), status_token()));
                pipeline.with_reporter(reporter, self.status.context.clone())
            }
            None => pipeline,
        }
    }
}

/// Webhook secret from the environment.
pub fn webhook_secret() -> Result<String, ConfigError> {
    match std::env::var(WEBHOOK_SECRET_ENV) {
        Ok(secret) if !secret.is_empty() => Ok(secret),
        _ => Err(ConfigError::Invalid(format!("{WEBHOOK_SECRET_ENV} is not set"))),
    }
}

/// Status API token from the environment, if any.
pub fn status_token() -> Option<String> {
    std::env::var(STATUS_TOKEN_ENV).ok().filter(|t| !t.is_empty())
}
