//! Validator definitions and configuration.

use serde::{Deserialize, Serialize};
use stackgate_core::FailurePolicy;

/// Placeholder replaced with the path of the template handed to a tool.
pub const TEMPLATE_PLACEHOLDER: &str = "{template}";

/// Output format a validator speaks, which selects its adapter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorKind {
    /// Schema/style linter with `path:line:col:endline:endcol:CODE:message` output
    /// and bit-flag exit codes.
    Lint,

    /// Policy scanner emitting a JSON violations report.
    RuleScan,

    /// Deployment simulation; exit code only.
    Simulation,

    /// Anything else: exit 0 passes, non-zero fails.
    Command,
}

impl ValidatorKind {
    /// Get the kind name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            ValidatorKind::Lint => "lint",
            ValidatorKind::RuleScan => "rule_scan",
            ValidatorKind::Simulation => "simulation",
            ValidatorKind::Command => "command",
        }
    }

    /// Conventional command for kinds that have one.
    pub fn default_command(&self) -> Option<Vec<String>> {
        match self {
            ValidatorKind::Lint => Some(vec![
                "cfn-lint".to_string(),
                "--format".to_string(),
                "parseable".to_string(),
                TEMPLATE_PLACEHOLDER.to_string(),
            ]),
            _ => None,
        }
    }
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_enabled() -> bool {
    true
}

/// Configuration for one validator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidatorSpec {
    /// Unique name within a pipeline.
    pub name: String,

    /// Output format / adapter selection.
    pub kind: ValidatorKind,

    /// Command to execute (first element is executable). `{template}` is
    /// replaced by the template path; if absent the path is appended.
    #[serde(default)]
    pub command: Vec<String>,

    #[serde(default)]
    pub policy: FailurePolicy,

    /// Timeout in seconds per attempt.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra attempts allowed after an `error` or `timeout`.
    #[serde(default)]
    pub max_retries: u32,

    /// Base delay for exponential backoff between attempts.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Whether this validator runs.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl ValidatorSpec {
    /// Create a blocking validator.
    pub fn new(name: impl Into<String>, kind: ValidatorKind, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            command,
            policy: FailurePolicy::Blocking,
            timeout_secs: default_timeout_secs(),
            max_retries: 0,
            backoff_base_ms: default_backoff_base_ms(),
            enabled: true,
        }
    }

    /// Create a generic command validator.
    pub fn command(name: impl Into<String>, command: Vec<String>) -> Self {
        Self::new(name, ValidatorKind::Command, command)
    }

    /// Create a validator with its kind's conventional command.
    pub fn from_kind(name: impl Into<String>, kind: ValidatorKind) -> Self {
        Self::new(name, kind, kind.default_command().unwrap_or_default())
    }

    pub fn advisory(mut self) -> Self {
        self.policy = FailurePolicy::Advisory;
        self
    }

    pub fn blocking(mut self) -> Self {
        self.policy = FailurePolicy::Blocking;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, backoff_base_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.backoff_base_ms = backoff_base_ms;
        self
    }

    /// Disable this validator.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn is_blocking(&self) -> bool {
        self.policy == FailurePolicy::Blocking
    }

    /// The command line with the template path substituted in.
    pub fn render_command(&self, template_path: &str) -> Vec<String> {
        let mut substituted = false;
        let mut argv: Vec<String> = self
            .command
            .iter()
            .map(|arg| {
                if arg.contains(TEMPLATE_PLACEHOLDER) {
                    substituted = true;
                    arg.replace(TEMPLATE_PLACEHOLDER, template_path)
                } else {
                    arg.clone()
                }
            })
            .collect();
        if !substituted && !argv.is_empty() {
            argv.push(template_path.to_string());
        }
        argv
    }
}
