//! Structured observability hooks for pipeline execution lifecycle events.
//!
//! This module provides:
//! - Execution-scoped tracing spans via the `ExecutionSpan` RAII guard and
//!   [`execution_span`] for instrumenting futures
//! - Emission functions for key lifecycle events: start, transition,
//!   validator finished, gate evaluated, deploy applied, finish
//!
//! Events are emitted at `info!` level (configurable via `RUST_LOG`).

use tracing::info;

/// RAII guard that enters an execution-scoped tracing span.
///
/// Holds an entered span, so it must not be kept across `.await` points in a
/// future that needs to be `Send`; use [`execution_span`] with
/// `tracing::Instrument` there instead.
///
/// # Example
///
/// ```ignore
/// let _span = ExecutionSpan::enter("c0ffee-...");
/// // all tracing calls are now tagged with execution_id
/// ```
pub struct ExecutionSpan {
    _span: tracing::span::EnteredSpan,
}

impl ExecutionSpan {
    /// Create and enter a span tagged with the execution id.
    pub fn enter(execution_id: &str) -> Self {
        Self {
            _span: execution_span(execution_id).entered(),
        }
    }
}

/// Span for one execution, for use with `tracing::Instrument`.
pub fn execution_span(execution_id: &str) -> tracing::Span {
    tracing::info_span!("stackgate.execution", execution_id = %execution_id)
}

/// Emit event: execution created for a trigger.
pub fn emit_execution_started(execution_id: &str, trigger: &str, commit_sha: &str) {
    info!(
        event = "execution.started",
        execution_id = %execution_id,
        trigger = %trigger,
        commit_sha = %commit_sha,
    );
}

/// Emit event: execution moved between states.
pub fn emit_transition(execution_id: &str, from: &str, to: &str) {
    info!(event = "execution.transition", execution_id = %execution_id, from = %from, to = %to);
}

/// Emit event: one validator produced its result.
pub fn emit_validator_finished(
    validator: &str,
    status: &str,
    attempts: u32,
    duration_ms: u64,
    diagnostics: usize,
) {
    info!(
        event = "validator.finished",
        validator = %validator,
        status = %status,
        attempts = attempts,
        duration_ms = duration_ms,
        diagnostics = diagnostics,
    );
}

/// Emit event: gate verdict computed.
pub fn emit_gate_evaluated(total: usize, blocking_failures: usize, passed: bool) {
    info!(
        event = "gate.evaluated",
        total = total,
        blocking_failures = blocking_failures,
        passed = passed,
    );
}

/// Emit event: one change applied to the target environment.
pub fn emit_deploy_applied(environment: &str, action: &str, resource: &str, status: &str) {
    info!(
        event = "deploy.applied",
        environment = %environment,
        action = %action,
        resource = %resource,
        status = %status,
    );
}

/// Emit event: execution reached a terminal state.
pub fn emit_execution_finished(execution_id: &str, outcome: &str, duration_ms: u64) {
    info!(
        event = "execution.finished",
        execution_id = %execution_id,
        outcome = %outcome,
        duration_ms = duration_ms,
    );
}

/// Emit event: persisting execution state failed (warning level).
pub fn emit_persist_error(execution_id: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "execution.persist_error", execution_id = %execution_id, error = %error);
}
