//! Structured toolchain diagnostics.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => f.write_str("info"),
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

/// Source position of a diagnostic (1-indexed line, 0-indexed column as
/// reported by the checker).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

/// A single located error record parsed from toolchain output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,

    /// Where the checker located the problem, when it said.
    pub location: Option<Location>,

    /// Message text with the location prefix removed.
    pub message: String,

    /// The raw output lines this diagnostic was parsed from.
    pub raw_excerpt: String,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            severity,
            location: None,
            raw_excerpt: message.clone(),
            message,
        }
    }

    /// Error diagnostic not tied to a source position.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    /// Set file location.
    pub fn with_location(mut self, file: impl Into<String>, line: u32, column: u32) -> Self {
        self.location = Some(Location {
            file: file.into(),
            line,
            column,
        });
        self
    }

    /// Set the raw excerpt.
    pub fn with_excerpt(mut self, raw: impl Into<String>) -> Self {
        self.raw_excerpt = raw.into();
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Text fed back to the generator as corrective feedback.
    pub fn render(&self) -> String {
        match &self.location {
            Some(loc) => format!(
                "{}:{}:{}: {}: {}",
                loc.file, loc.line, loc.column, self.severity, self.message
            ),
            None => format!("{}: {}", self.severity, self.message),
        }
    }
}
