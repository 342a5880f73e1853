//! stackgate CI - gated delivery for infrastructure templates
//!
//! Provides the pipeline orchestrator that:
//! - Authenticates and filters change notifications (`trigger`)
//! - Runs validators concurrently and folds them into a verdict (`gate`)
//! - Promotes passing templates through a scoped credential (`deploy`)
//! - Records every transition and reports back to pull requests (`pipeline`)

pub mod adapter;
pub mod adapters;
pub mod cancel;
pub mod command_target;
pub mod config;
pub mod deploy;
pub mod fakes;
pub mod gate;
pub mod lock;
pub mod pipeline;
pub mod runner;
pub mod source;
pub mod spec;
pub mod status;
pub mod trigger;

// Re-export key types
pub use adapter::{build_adapter, Interpretation, ValidatorAdapter};
pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use command_target::CommandTarget;
pub use config::{ConfigError, PipelineConfig};
pub use deploy::{DeployError, DeploymentExecutor, DeploymentTarget, ExecutorSettings};
pub use gate::GateAggregator;
pub use lock::{ConflictPolicy, EnvironmentGuard, EnvironmentLocks};
pub use pipeline::{ExecutionHandle, Pipeline};
pub use runner::{ToolOutput, ToolRunner};
pub use source::{GitSource, SourceProvider};
pub use spec::{ValidatorKind, ValidatorSpec};
pub use status::{HttpStatusReporter, StatusError, StatusReporter};
pub use trigger::{TriggerDecision, TriggerError, TriggerListener, WebhookHeaders};
