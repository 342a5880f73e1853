//! Commit-status documents and human summaries derived from executions.

use serde::{Deserialize, Serialize};

use crate::domain::execution::{ExecutionState, Outcome, PipelineExecution};
use crate::domain::validation::GateVerdict;

/// Longest description most source-control hosts accept on a status.
pub const MAX_DESCRIPTION_LEN: usize = 140;

/// State of a commit status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommitState {
    Pending,
    Success,
    Failure,
    Error,
}

/// Body posted to the source-control host for a commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitStatus {
    pub state: CommitState,
    pub context: String,
    pub description: String,
}

impl CommitStatus {
    /// Status for an execution in its current state.
    pub fn for_execution(context: &str, execution: &PipelineExecution) -> Self {
        let state = match execution.outcome() {
            None => CommitState::Pending,
            Some(Outcome::Succeeded) => CommitState::Success,
            Some(Outcome::Failed) => CommitState::Failure,
            Some(Outcome::Cancelled) => CommitState::Error,
        };
        Self {
            state,
            context: context.to_string(),
            description: truncate(&status_description(execution), MAX_DESCRIPTION_LEN),
        }
    }
}

/// One-line description of where an execution stands.
pub fn status_description(execution: &PipelineExecution) -> String {
    match execution.state() {
        ExecutionState::Pending | ExecutionState::Sourcing => "Fetching template".to_string(),
        ExecutionState::Testing => "Running validators".to_string(),
        ExecutionState::Deploying => "Deploying".to_string(),
        ExecutionState::Cancelled => "Cancelled".to_string(),
        ExecutionState::Succeeded | ExecutionState::Failed => {
            let last = execution.verdicts().last().map(|s| &s.verdict);
            match (last, execution.error()) {
                (Some(v), _) if !v.passed() => summarize_verdict(v),
                (_, Some(err)) => err.to_string(),
                (Some(v), None) => summarize_verdict(v),
                (None, None) => execution.state().to_string(),
            }
        }
    }
}

/// Summary of a verdict: counts first, then the first blocking finding.
///
/// ```text
/// 1 of 3 blocking validators failed: lint: E3012 Invalid type (template.yaml:4)
/// ```
pub fn summarize_verdict(verdict: &GateVerdict) -> String {
    let blocking = verdict.results.iter().filter(|r| r.is_blocking()).count();
    let failures: Vec<_> = verdict.blocking_failures().collect();
    let advisory = verdict.advisory_findings().count();

    let mut out = if failures.is_empty() {
        format!("All {} blocking validators passed", blocking)
    } else {
        format!(
            "{} of {} blocking validators failed",
            failures.len(),
            blocking
        )
    };
    if advisory > 0 {
        out.push_str(&format!(", {} advisory finding(s)", advisory));
    }
    if let Some(first) = failures.first() {
        let detail = first
            .diagnostics
            .first()
            .map(|d| d.summary_line())
            .unwrap_or_else(|| first.status.as_str().to_string());
        out.push_str(&format!(": {}: {}", first.validator, detail));
    }
    out
}

/// Render a markdown report of an execution for operators.
pub fn render_execution_md(execution: &PipelineExecution) -> String {
    let source = &execution.trigger().source;
    let mut out = String::new();
    out.push_str(&format!("# Execution {}\n\n", execution.id()));
    out.push_str(&format!(
        "- Source: `{}` @ `{}` ({})\n",
        source.repository,
        source.short_sha(),
        source.branch
    ));
    out.push_str(&format!("- Trigger: {}\n", execution.trigger().kind.as_str()));
    out.push_str(&format!("- State: {}\n", execution.state()));
    if let Some(digest) = execution.artifact_digest() {
        out.push_str(&format!("- Artifact: `{}`\n", digest.short()));
    }
    if let Some(err) = execution.error() {
        out.push_str(&format!("- Error: {}\n", err));
    }

    for stage in execution.verdicts() {
        out.push_str(&format!(
            "\n## {} ({})\n\n| Validator | Policy | Status | Findings |\n|---|---|---|---|\n",
            stage.stage,
            if stage.verdict.passed() { "pass" } else { "fail" }
        ));
        for r in &stage.verdict.results {
            out.push_str(&format!(
                "| {} | {:?} | {} | {} |\n",
                r.validator,
                r.policy,
                r.status.as_str(),
                r.diagnostics.len()
            ));
        }
    }

    if let Some(deploy) = execution.deployment() {
        out.push_str(&format!("\n## Deployment to {}\n\n", deploy.environment));
        if deploy.is_noop() {
            out.push_str("No changes.\n");
        }
        for change in &deploy.applied {
            out.push_str(&format!("- {}\n", change));
        }
    }
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}
