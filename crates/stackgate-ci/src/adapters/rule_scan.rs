//! Policy/best-practice scanner adapter.
//!
//! The scanner prints a JSON report on stdout:
//!
//! ```json
//! {"violations": [{"rule": "S3_BUCKET_SSE", "severity": "error",
//!                  "message": "Bucket is not encrypted", "resource": "LogsBucket"}]}
//! ```
//!
//! Exit 0 means no blocking violations, exit 1 means violations were found.

use serde::Deserialize;
use stackgate_core::{Diagnostic, Severity};

use crate::adapter::{stderr_or_exit, Interpretation, ValidatorAdapter};
use crate::runner::ToolOutput;
use crate::spec::ValidatorSpec;

#[derive(Debug, Deserialize)]
struct ScanReport {
    #[serde(default)]
    violations: Vec<Violation>,
}

#[derive(Debug, Deserialize)]
struct Violation {
    rule: String,
    #[serde(default)]
    severity: String,
    message: String,
    #[serde(default)]
    resource: Option<String>,
}

impl Violation {
    fn into_diagnostic(self) -> Diagnostic {
        let severity = match self.severity.to_ascii_lowercase().as_str() {
            "error" | "failure" | "critical" | "high" => Severity::Error,
            "warning" | "warn" | "medium" => Severity::Warning,
            _ => Severity::Info,
        };
        let diag = Diagnostic::new(severity, self.message).with_code(self.rule);
        match self.resource {
            Some(resource) => diag.at_resource(resource),
            None => diag,
        }
    }
}

pub struct RuleScanAdapter {
    spec: ValidatorSpec,
}

impl RuleScanAdapter {
    pub fn new(spec: ValidatorSpec) -> Self {
        Self { spec }
    }
}

impl ValidatorAdapter for RuleScanAdapter {
    fn spec(&self) -> &ValidatorSpec {
        &self.spec
    }

    fn interpret(&self, output: &ToolOutput) -> Interpretation {
        match output.exit_code {
            Some(0) if output.stdout.trim().is_empty() => Interpretation::Pass(vec![]),
            Some(0) => match parse_report(&output.stdout) {
                Ok(diags) => Interpretation::Pass(diags),
                Err(e) => Interpretation::Error(e),
            },
            Some(1) => match parse_report(&output.stdout) {
                Ok(diags) if diags.is_empty() => Interpretation::Error(
                    "scanner reported failure without any violations".to_string(),
                ),
                Ok(diags) => Interpretation::Fail(diags),
                Err(e) => Interpretation::Error(e),
            },
            _ => Interpretation::Error(stderr_or_exit(output)),
        }
    }
}

fn parse_report(stdout: &str) -> Result<Vec<Diagnostic>, String> {
    let report: ScanReport = serde_json::from_str(stdout.trim())
        .map_err(|e| format!("malformed scanner report: {}", e))?;
    Ok(report
        .violations
        .into_iter()
        .map(Violation::into_diagnostic)
        .collect())
}
