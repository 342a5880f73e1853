//! Generic command adapter: exit 0 passes, any other exit fails.

use stackgate_core::Diagnostic;

use crate::adapter::{Interpretation, ValidatorAdapter};
use crate::runner::{tail_lines, ToolOutput};
use crate::spec::ValidatorSpec;

pub struct CommandAdapter {
    spec: ValidatorSpec,
}

impl CommandAdapter {
    pub fn new(spec: ValidatorSpec) -> Self {
        Self { spec }
    }
}

impl ValidatorAdapter for CommandAdapter {
    fn spec(&self) -> &ValidatorSpec {
        &self.spec
    }

    fn interpret(&self, output: &ToolOutput) -> Interpretation {
        if output.succeeded() {
            return Interpretation::Pass(vec![]);
        }
        let detail = tail_lines(&output.combined(), 5);
        let message = if detail.is_empty() {
            format!("exited with code {}", output.exit_code.unwrap_or(-1))
        } else {
            detail
        };
        Interpretation::Fail(vec![Diagnostic::error(message)])
    }
}
