//! Generated target-language artifacts.

use serde::{Deserialize, Serialize};

use crate::domain::diagnostic::Diagnostic;

/// Whether a theorem is expected to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Positive,
    /// Intentionally false; proving it means the model is too weak.
    Negative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Data-shape definitions.
    Structure,
    /// Behavior models.
    Function,
    /// Correctness claims.
    Theorem { polarity: Polarity },
}

impl ArtifactKind {
    pub fn positive_theorem() -> Self {
        ArtifactKind::Theorem {
            polarity: Polarity::Positive,
        }
    }

    pub fn negative_theorem() -> Self {
        ArtifactKind::Theorem {
            polarity: Polarity::Negative,
        }
    }

    /// Directory the renderer places this kind under.
    pub fn directory(self) -> &'static str {
        match self {
            ArtifactKind::Structure => "Structures",
            ArtifactKind::Function => "Functions",
            ArtifactKind::Theorem { .. } => "Theorems",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Pending,
    Succeeded,
    Failed,
}

/// A named piece of generated content owned by one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub kind: ArtifactKind,

    /// Generated source text, without renderer-added imports.
    pub source: String,

    /// Materialization path relative to the project tree root.
    pub path: String,

    pub status: ArtifactStatus,

    /// Diagnostics from the last check; empty on success.
    pub diagnostics: Vec<Diagnostic>,
}

impl Artifact {
    pub fn new(name: impl Into<String>, kind: ArtifactKind) -> Self {
        Self {
            name: name.into(),
            kind,
            source: String::new(),
            path: String::new(),
            status: ArtifactStatus::Pending,
            diagnostics: Vec::new(),
        }
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == ArtifactStatus::Succeeded
    }

    pub fn is_theorem(&self, polarity: Polarity) -> bool {
        self.kind == ArtifactKind::Theorem { polarity }
    }
}
