//! Deployment simulation adapter (e.g. a change-set dry run).
//!
//! Only the exit code is meaningful; the tail of stdout is kept as a finding
//! so the verdict summary says what the simulation printed last.

use stackgate_core::{Diagnostic, Severity};

use crate::adapter::{stderr_or_exit, Interpretation, ValidatorAdapter};
use crate::runner::{tail_lines, ToolOutput};
use crate::spec::ValidatorSpec;

const TAIL_LINES: usize = 20;

pub struct SimulationAdapter {
    spec: ValidatorSpec,
}

impl SimulationAdapter {
    pub fn new(spec: ValidatorSpec) -> Self {
        Self { spec }
    }
}

impl ValidatorAdapter for SimulationAdapter {
    fn spec(&self) -> &ValidatorSpec {
        &self.spec
    }

    fn interpret(&self, output: &ToolOutput) -> Interpretation {
        let tail = tail_lines(&output.stdout, TAIL_LINES);
        let finding = |severity| {
            if tail.is_empty() {
                vec![]
            } else {
                vec![Diagnostic::new(severity, tail.clone())]
            }
        };
        match output.exit_code {
            Some(0) => Interpretation::Pass(finding(Severity::Info)),
            Some(1) => Interpretation::Fail(finding(Severity::Error)),
            _ => Interpretation::Error(stderr_or_exit(output)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::ValidatorKind;

    fn adapter() -> SimulationAdapter {
        SimulationAdapter::new(ValidatorSpec::new(
            "simulate",
            ValidatorKind::Simulation,
            vec!["simulate".into()],
        ))
    }

    fn output(code: Option<i32>, stdout: &str) -> ToolOutput {
        ToolOutput {
            exit_code: code,
            stdout: stdout.to_string(),
            stderr: String::new(),
            duration_ms: 1,
        }
    }

    #[test]
    fn test_pass_keeps_tail_as_info() {
        let Interpretation::Pass(diags) =
            adapter().interpret(&output(Some(0), "plan:\n+ Bucket\n+ Queue\n"))
        else {
            panic!("expected pass");
        };
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, Severity::Info);
        assert!(diags[0].message.ends_with("+ Queue"));
    }

    #[test]
    fn test_fail_keeps_tail_as_error() {
        let Interpretation::Fail(diags) =
            adapter().interpret(&output(Some(1), "Bucket name already taken"))
        else {
            panic!("expected fail");
        };
        assert_eq!(diags[0].severity, Severity::Error);
    }

    #[test]
    fn test_silent_pass_has_no_findings() {
        assert_eq!(
            adapter().interpret(&output(Some(0), "")),
            Interpretation::Pass(vec![])
        );
    }

    #[test]
    fn test_throttling_exit_is_error() {
        assert!(matches!(
            adapter().interpret(&output(Some(255), "Rate exceeded")),
            Interpretation::Error(_)
        ));
    }
}
