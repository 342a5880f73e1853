//! stackgate core library
//!
//! Domain model for the pipeline orchestrator: artifacts, validation results
//! and gate verdicts, deployment credentials, and the execution state
//! machine, plus the ambient pieces every binary shares (tracing setup,
//! lifecycle events, execution recording, status summaries, git access).

pub mod domain;
pub mod git;
pub mod obs;
pub mod recording;
pub mod reporting;
pub mod telemetry;

pub use domain::{
    baseline_permissions, is_commit_sha, Artifact, ChangeStatus, DeployOutcome,
    DeployedResource, DeploymentCredential, Diagnostic, ExecutionState, FailurePolicy,
    GateVerdict, Grant, Location, Outcome, PipelineError, PipelineExecution, PipelinePath,
    PlannedChange, RequiredPermission, ResourceAction, ResourceDeclaration, Result, Severity,
    SourceRef, StageVerdict, Transition, TriggerEvent, TriggerKind, ValidationResult,
    ValidationStatus, VerdictStatus, TEST_STAGE,
};

pub use git::{capture_head_sha, is_git_repo, read_blob, resolve_commit};
pub use recording::ExecutionRecorder;
pub use reporting::{CommitState, CommitStatus};
pub use telemetry::init_tracing;

pub use stackgate_state::{ContentDigest, ExecutionId, ExecutionQuery, ExecutionStore};
