//! Domain-level error taxonomy for stackgate.

use stackgate_state::StorageError;

/// Pipeline errors.
///
/// Every failure an execution can end with maps onto one of these; the
/// execution record stores the rendered message alongside the outcome.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A blocking validator did not pass.
    #[error("validation failed: {failed} blocking validator(s) did not pass ({names})")]
    ValidationFailure { failed: usize, names: String },

    /// A validator tool could not be started or its output analyzed.
    #[error("tool invocation failed for {validator}: {reason}")]
    ToolInvocation { validator: String, reason: String },

    /// A bounded operation exceeded its time limit.
    #[error("timed out after {elapsed_secs}s: {operation}")]
    Timeout { operation: String, elapsed_secs: u64 },

    /// The deployment credential does not cover the required actions.
    #[error("permission insufficient: credential {credential} is missing {missing}")]
    PermissionInsufficient { credential: String, missing: String },

    /// Another deployment to the same environment holds the lock.
    #[error("concurrent deployment conflict on environment {environment}")]
    ConcurrentDeploymentConflict { environment: String },

    /// The state machine was asked to make an illegal move.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// The artifact could not be fetched or read.
    #[error("source error: {0}")]
    Source(String),

    /// Deployment failed after the permission check.
    #[error("deployment failed: {0}")]
    Deployment(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("execution cancelled")]
    Cancelled,

    /// The task driving an execution ended abnormally.
    #[error("execution task failed: {0}")]
    Task(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Whether resubmitting the same trigger could plausibly succeed.
    ///
    /// Nothing is retried automatically; callers use this to decide whether
    /// to surface a "retry" hint.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::ToolInvocation { .. }
                | PipelineError::Timeout { .. }
                | PipelineError::ConcurrentDeploymentConflict { .. }
                | PipelineError::Storage(_)
        )
    }
}

/// Result type for pipeline domain operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
