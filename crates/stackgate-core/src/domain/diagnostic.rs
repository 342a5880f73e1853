//! Normalized validator diagnostics.

use serde::{Deserialize, Serialize};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// Where in the template a finding points.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Location {
    /// Template path as reported by the tool.
    pub path: Option<String>,
    /// Line number (1-indexed).
    pub line: Option<u32>,
    /// Column number (1-indexed).
    pub column: Option<u32>,
    /// Logical resource id, for tools that report by resource rather than line.
    pub resource: Option<String>,
}

/// A single normalized finding from a validator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Diagnostic {
    /// Severity level.
    pub severity: Severity,

    /// Human-readable message.
    pub message: String,

    /// Rule or check code (e.g. "E3012").
    pub code: Option<String>,

    /// Optional location of the finding.
    pub location: Option<Location>,
}

impl Diagnostic {
    /// Create a new diagnostic.
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            code: None,
            location: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    /// Set diagnostic code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Set a line/column location.
    pub fn at_line(mut self, path: impl Into<String>, line: u32, column: u32) -> Self {
        let location = self.location.get_or_insert(Location {
            path: None,
            line: None,
            column: None,
            resource: None,
        });
        location.path = Some(path.into());
        location.line = Some(line);
        location.column = Some(column);
        self
    }

    /// Set the logical resource the finding refers to.
    pub fn at_resource(mut self, resource: impl Into<String>) -> Self {
        let location = self.location.get_or_insert(Location {
            path: None,
            line: None,
            column: None,
            resource: None,
        });
        location.resource = Some(resource.into());
        self
    }

    /// One-line rendering used in status summaries.
    pub fn summary_line(&self) -> String {
        let mut line = String::new();
        if let Some(code) = &self.code {
            line.push_str(code);
            line.push(' ');
        }
        line.push_str(&self.message);
        if let Some(loc) = &self.location {
            match (&loc.path, loc.line, &loc.resource) {
                (Some(path), Some(l), _) => line.push_str(&format!(" ({}:{})", path, l)),
                (_, _, Some(resource)) => line.push_str(&format!(" ({})", resource)),
                _ => {}
            }
        }
        line
    }
}
