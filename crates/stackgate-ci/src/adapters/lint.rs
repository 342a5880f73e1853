//! Schema/style linter adapter.
//!
//! Expects "parseable" output, one finding per line:
//!
//! ```text
//! template.yaml:12:3:12:9:E3002:Invalid Property Resources/Bucket/Properties/Nmae
//! ```
//!
//! Exit codes are bit flags: 2 = errors, 4 = warnings, 8 = informational.

use std::sync::LazyLock;

use regex::Regex;
use stackgate_core::{Diagnostic, Severity};

use crate::adapter::{stderr_or_exit, Interpretation, ValidatorAdapter};
use crate::runner::ToolOutput;
use crate::spec::ValidatorSpec;

static FINDING_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?P<path>.+?):(?P<line>\d+):(?P<col>\d+):\d+:\d+:",
        r"(?P<code>[EWI]\d+):(?P<message>.*)$",
    ))
    .expect("finding pattern compiles")
});

const ERROR_FLAG: i32 = 2;
const ALL_FLAGS: i32 = 2 | 4 | 8;

pub struct LintAdapter {
    spec: ValidatorSpec,
}

impl LintAdapter {
    pub fn new(spec: ValidatorSpec) -> Self {
        Self { spec }
    }
}

impl ValidatorAdapter for LintAdapter {
    fn spec(&self) -> &ValidatorSpec {
        &self.spec
    }

    fn interpret(&self, output: &ToolOutput) -> Interpretation {
        let Some(code) = output.exit_code else {
            return Interpretation::Error(stderr_or_exit(output));
        };
        if code != 0 && (code & !ALL_FLAGS != 0) {
            return Interpretation::Error(stderr_or_exit(output));
        }

        let diagnostics = match parse_findings(&output.stdout) {
            Ok(d) => d,
            Err(message) => return Interpretation::Error(message),
        };

        if code == 0 {
            return Interpretation::Pass(diagnostics);
        }
        if diagnostics.is_empty() {
            return Interpretation::Error(format!(
                "linter exited {} but reported no parseable findings",
                code
            ));
        }
        if code & ERROR_FLAG != 0 {
            Interpretation::Fail(diagnostics)
        } else {
            Interpretation::Pass(diagnostics)
        }
    }
}

fn parse_findings(stdout: &str) -> Result<Vec<Diagnostic>, String> {
    let mut findings = Vec::new();
    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some(caps) = FINDING_LINE.captures(line) else {
            return Err(format!("unparseable linter output: {}", line));
        };
        let code = &caps["code"];
        let severity = match code.as_bytes()[0] {
            b'E' => Severity::Error,
            b'W' => Severity::Warning,
            _ => Severity::Info,
        };
        let line_no = caps["line"].parse().unwrap_or(0);
        let col = caps["col"].parse().unwrap_or(0);
        findings.push(
            Diagnostic::new(severity, caps["message"].trim())
                .with_code(code)
                .at_line(&caps["path"], line_no, col),
        );
    }
    Ok(findings)
}
