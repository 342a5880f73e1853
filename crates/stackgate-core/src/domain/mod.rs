//! Domain models for stackgate.
//!
//! Canonical definitions for the core entities:
//! - `Artifact`: immutable template plus source reference and digest
//! - `ValidationResult` / `GateVerdict`: normalized validator outcomes
//! - `DeploymentCredential`: scoped authority over a target environment
//! - `PipelineExecution`: one run of the pipeline and its state machine

pub mod artifact;
pub mod change;
pub mod credential;
pub mod diagnostic;
pub mod error;
pub mod execution;
pub mod validation;

// Re-export main types and errors
pub use artifact::{is_commit_sha, Artifact, ResourceDeclaration, SourceRef};
pub use change::{ChangeStatus, DeployOutcome, DeployedResource, PlannedChange};
pub use credential::{
    baseline_permissions, DeploymentCredential, Grant, RequiredPermission, ResourceAction,
};
pub use diagnostic::{Diagnostic, Location, Severity};
pub use error::{PipelineError, Result};
pub use execution::{
    ExecutionState, Outcome, PipelineExecution, PipelinePath, StageVerdict, Transition,
    TriggerEvent, TriggerKind, TEST_STAGE,
};
pub use validation::{FailurePolicy, GateVerdict, ValidationResult, ValidationStatus, VerdictStatus};
