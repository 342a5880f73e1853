//! Validation results and the aggregated gate verdict.

use serde::{Deserialize, Serialize};

use super::diagnostic::Diagnostic;

/// How a validator's outcome affects the gate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Any non-pass status fails the gate.
    #[default]
    Blocking,
    /// Non-pass statuses are recorded but never fail the gate.
    Advisory,
}

/// Normalized outcome of one validator invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// The tool ran and reported no blocking findings.
    Pass,
    /// The tool ran and reported a failure.
    Fail,
    /// The tool could not be run or its output could not be analyzed.
    Error,
    /// The tool exceeded its time bound.
    Timeout,
}

impl ValidationStatus {
    pub fn is_pass(&self) -> bool {
        matches!(self, ValidationStatus::Pass)
    }

    /// `error` and `timeout` are infrastructure outcomes and may be retried;
    /// `pass` and `fail` are verdicts about the artifact and may not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ValidationStatus::Error | ValidationStatus::Timeout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Pass => "pass",
            ValidationStatus::Fail => "fail",
            ValidationStatus::Error => "error",
            ValidationStatus::Timeout => "timeout",
        }
    }
}

/// Result of running one validator against one artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationResult {
    /// Validator name, as configured.
    pub validator: String,

    /// Policy the validator ran under.
    pub policy: FailurePolicy,

    /// Normalized status.
    pub status: ValidationStatus,

    /// Ordered findings.
    pub diagnostics: Vec<Diagnostic>,

    /// Captured stdout/stderr, untouched.
    pub raw_output: String,

    /// Number of invocations made (1 = no retries used).
    pub attempts: u32,

    /// Wall-clock duration of the final attempt in milliseconds.
    pub duration_ms: u64,
}

impl ValidationResult {
    /// Create a result with the given status and no findings.
    pub fn new(
        validator: impl Into<String>,
        policy: FailurePolicy,
        status: ValidationStatus,
    ) -> Self {
        Self {
            validator: validator.into(),
            policy,
            status,
            diagnostics: Vec::new(),
            raw_output: String::new(),
            attempts: 1,
            duration_ms: 0,
        }
    }

    /// A tool-invocation failure with the message as the single diagnostic.
    pub fn error(
        validator: impl Into<String>,
        policy: FailurePolicy,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        let mut result = Self::new(validator, policy, ValidationStatus::Error);
        result.diagnostics.push(Diagnostic::error(message.clone()));
        result.raw_output = message;
        result
    }

    /// A timed-out invocation; timeouts carry no diagnostics.
    pub fn timeout(validator: impl Into<String>, policy: FailurePolicy) -> Self {
        Self::new(validator, policy, ValidationStatus::Timeout)
    }

    pub fn with_diagnostics(mut self, diagnostics: Vec<Diagnostic>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_raw_output(mut self, raw: impl Into<String>) -> Self {
        self.raw_output = raw.into();
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn is_blocking(&self) -> bool {
        self.policy == FailurePolicy::Blocking
    }

    /// Whether this result forces the gate to fail.
    pub fn blocks_gate(&self) -> bool {
        self.is_blocking() && !self.status.is_pass()
    }
}

/// Overall gate status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Pass,
    Fail,
}

/// Aggregate of every validation result produced for one stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateVerdict {
    pub status: VerdictStatus,
    /// All results, blocking and advisory, in configured order.
    pub results: Vec<ValidationResult>,
}

impl GateVerdict {
    /// Aggregate results: `fail` iff at least one blocking result is not `pass`.
    pub fn from_results(results: Vec<ValidationResult>) -> Self {
        let status = if results.iter().any(ValidationResult::blocks_gate) {
            VerdictStatus::Fail
        } else {
            VerdictStatus::Pass
        };
        Self { status, results }
    }

    pub fn passed(&self) -> bool {
        self.status == VerdictStatus::Pass
    }

    /// Blocking results that failed the gate.
    pub fn blocking_failures(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| r.blocks_gate())
    }

    /// Advisory results that did not pass.
    pub fn advisory_findings(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results
            .iter()
            .filter(|r| !r.is_blocking() && !r.status.is_pass())
    }

    pub fn result(&self, validator: &str) -> Option<&ValidationResult> {
        self.results.iter().find(|r| r.validator == validator)
    }
}
