//! The validator adapter contract and the shared invoke/retry loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use stackgate_core::{obs, Artifact, Diagnostic, ValidationResult, ValidationStatus};
use tracing::{debug, warn};

use crate::adapters::{CommandAdapter, LintAdapter, RuleScanAdapter, SimulationAdapter};
use crate::runner::{RunError, StagedTemplate, ToolOutput, ToolRunner};
use crate::spec::{ValidatorKind, ValidatorSpec};

/// What an adapter concluded from a completed tool run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interpretation {
    Pass(Vec<Diagnostic>),
    Fail(Vec<Diagnostic>),
    /// The exit or output could not be analyzed.
    Error(String),
}

/// Runs one external validator and normalizes its outcome.
#[async_trait]
pub trait ValidatorAdapter: Send + Sync {
    fn spec(&self) -> &ValidatorSpec;

    /// Map a completed process to pass/fail/error. Must not panic on any input.
    fn interpret(&self, output: &ToolOutput) -> Interpretation;

    /// Run against `artifact`, retrying `error`/`timeout` up to the validator's
    /// `max_retries`.
    async fn run(&self, artifact: &Artifact) -> ValidationResult {
        run_with_retries(self.spec(), artifact, |output| self.interpret(output)).await
    }
}

/// Build the adapter for a spec's kind.
pub fn build_adapter(spec: ValidatorSpec) -> Arc<dyn ValidatorAdapter> {
    match spec.kind {
        ValidatorKind::Lint => Arc::new(LintAdapter::new(spec)),
        ValidatorKind::RuleScan => Arc::new(RuleScanAdapter::new(spec)),
        ValidatorKind::Simulation => Arc::new(SimulationAdapter::new(spec)),
        ValidatorKind::Command => Arc::new(CommandAdapter::new(spec)),
    }
}

/// Invoke once per attempt until the status is `pass`/`fail` or retries run out.
pub async fn run_with_retries<F>(
    spec: &ValidatorSpec,
    artifact: &Artifact,
    interpret: F,
) -> ValidationResult
where
    F: Fn(&ToolOutput) -> Interpretation + Send + Sync,
{
    let max_attempts = spec.max_retries.saturating_add(1);
    let mut attempt = 1;
    loop {
        let result = invoke_once(spec, artifact, &interpret)
            .await
            .with_attempts(attempt);

        if !result.status.is_retryable() || attempt >= max_attempts {
            obs::emit_validator_finished(
                &result.validator,
                result.status.as_str(),
                result.attempts,
                result.duration_ms,
                result.diagnostics.len(),
            );
            return result;
        }

        // Exponential backoff before retry
        let factor = 1u64 << (attempt - 1).min(16);
        let delay = Duration::from_millis(spec.backoff_base_ms.saturating_mul(factor));
        warn!(
            validator = %spec.name,
            attempt,
            status = result.status.as_str(),
            delay_ms = delay.as_millis() as u64,
            "validator attempt did not complete, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

async fn invoke_once<F>(
    spec: &ValidatorSpec,
    artifact: &Artifact,
    interpret: &F,
) -> ValidationResult
where
    F: Fn(&ToolOutput) -> Interpretation,
{
    let staged = match StagedTemplate::write(artifact) {
        Ok(staged) => staged,
        Err(e) => {
            return ValidationResult::error(
                &spec.name,
                spec.policy,
                RunError::Staging(e).to_string(),
            )
        }
    };
    let argv = spec.render_command(&staged.path_str());
    debug!(validator = %spec.name, command = ?argv, "invoking validator");

    let output = match ToolRunner::run(&argv, spec.timeout_secs).await {
        Ok(output) => output,
        Err(RunError::Timeout(secs)) => {
            return ValidationResult::timeout(&spec.name, spec.policy)
                .with_duration_ms(secs.saturating_mul(1000))
        }
        Err(e) => return ValidationResult::error(&spec.name, spec.policy, e.to_string()),
    };

    let raw = output.combined();
    let duration_ms = output.duration_ms;

    // Signals are never analyzable.
    if output.exit_code.is_none() {
        return ValidationResult::error(&spec.name, spec.policy, stderr_or_exit(&output))
            .with_raw_output(raw)
            .with_duration_ms(duration_ms);
    }

    let (status, mut diagnostics) = match interpret(&output) {
        Interpretation::Pass(d) => (ValidationStatus::Pass, d),
        Interpretation::Fail(d) => (ValidationStatus::Fail, d),
        Interpretation::Error(message) => {
            (ValidationStatus::Error, vec![Diagnostic::error(message)])
        }
    };

    // Point findings at the template's repository path, not the staged copy.
    let staged_path = staged.path_str();
    for location in diagnostics.iter_mut().filter_map(|d| d.location.as_mut()) {
        if location.path.as_deref() == Some(staged_path.as_str()) {
            location.path = Some(artifact.template_path().to_string());
        }
    }
    ValidationResult::new(&spec.name, spec.policy, status)
        .with_diagnostics(diagnostics)
        .with_raw_output(raw)
        .with_duration_ms(duration_ms)
}

/// Trimmed stderr, or a description of the exit when stderr is empty.
pub fn stderr_or_exit(output: &ToolOutput) -> String {
    let stderr = output.stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    match output.exit_code {
        Some(code) => format!("exited with unexpected code {}", code),
        None => "terminated by signal".to_string(),
    }
}
