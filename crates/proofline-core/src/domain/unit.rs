//! Work units: tables and APIs formalized independently.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::artifact::{Artifact, ArtifactStatus, Polarity};
use crate::domain::diagnostic::Diagnostic;
use crate::domain::stage::Stage;

/// Unit kind. Tables sort before APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Table,
    Api,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitKind::Table => f.write_str("table"),
            UnitKind::Api => f.write_str("api"),
        }
    }
}

/// Identity of a unit. Ordered by `(kind, name)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitRef {
    pub kind: UnitKind,
    pub name: String,
}

impl UnitRef {
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            kind: UnitKind::Table,
            name: name.into(),
        }
    }

    pub fn api(name: impl Into<String>) -> Self {
        Self {
            kind: UnitKind::Api,
            name: name.into(),
        }
    }
}

impl fmt::Display for UnitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

/// Why a unit failed a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The generator refused the request; not retried.
    GeneratorRejected,
    /// Every attempt in the retry budget failed.
    BudgetExhausted,
    /// A negative theorem proved.
    ModelTooWeak,
    /// A dependency failed earlier in the same stage.
    DependencyFailed,
    /// Analysis output could not be parsed within budget.
    AnalysisFailed,
    /// The unit's task panicked.
    TaskPanicked,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::GeneratorRejected => "generator rejected",
            FailureReason::BudgetExhausted => "retry budget exhausted",
            FailureReason::ModelTooWeak => "model too weak",
            FailureReason::DependencyFailed => "dependency failed",
            FailureReason::AnalysisFailed => "analysis failed",
            FailureReason::TaskPanicked => "task panicked",
        };
        f.write_str(s)
    }
}

/// A recorded per-unit failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub reason: FailureReason,
    pub detail: String,
    /// Last diagnostics seen before the unit gave up.
    pub diagnostics: Vec<Diagnostic>,
}

impl UnitFailure {
    pub fn new(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
            diagnostics: Vec::new(),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Vec<Diagnostic>) -> Self {
        self.diagnostics = diagnostics;
        self
    }
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.detail)
    }
}

/// Per-stage progress of one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub status: UnitStatus,
    /// Generation attempts consumed in the last execution.
    pub attempts: u32,
    pub failure: Option<UnitFailure>,
}

impl Default for StageRecord {
    fn default() -> Self {
        Self {
            status: UnitStatus::Pending,
            attempts: 0,
            failure: None,
        }
    }
}

impl StageRecord {
    pub fn succeeded(attempts: u32) -> Self {
        Self {
            status: UnitStatus::Succeeded,
            attempts,
            failure: None,
        }
    }

    pub fn failed(attempts: u32, failure: UnitFailure) -> Self {
        Self {
            status: UnitStatus::Failed,
            attempts,
            failure: Some(failure),
        }
    }
}

/// A table or API being formalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub name: String,
    pub kind: UnitKind,

    /// Raw documentation / source context from the project parser.
    pub description: String,

    /// Inferred dependencies on other units.
    #[serde(default)]
    pub dependencies: Vec<UnitRef>,

    /// Natural-language claims (API requirements or table properties).
    #[serde(default)]
    pub requirements: Vec<String>,

    #[serde(default)]
    pub stages: BTreeMap<Stage, StageRecord>,

    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

impl WorkUnit {
    pub fn new(kind: UnitKind, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            dependencies: Vec::new(),
            requirements: Vec::new(),
            stages: BTreeMap::new(),
            artifacts: Vec::new(),
        }
    }

    pub fn unit_ref(&self) -> UnitRef {
        UnitRef {
            kind: self.kind,
            name: self.name.clone(),
        }
    }

    pub fn stage_status(&self, stage: Stage) -> UnitStatus {
        self.stages
            .get(&stage)
            .map(|r| r.status)
            .unwrap_or(UnitStatus::Pending)
    }

    pub fn set_stage(&mut self, stage: Stage, record: StageRecord) {
        self.stages.insert(stage, record);
    }

    pub fn artifact(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.name == name)
    }

    /// Insert or overwrite the artifact with the same name.
    pub fn upsert_artifact(&mut self, artifact: Artifact) {
        match self.artifacts.iter_mut().find(|a| a.name == artifact.name) {
            Some(existing) => *existing = artifact,
            None => self.artifacts.push(artifact),
        }
    }

    /// Theorem statements of the given polarity, in insertion order.
    pub fn theorems(&self, polarity: Polarity) -> impl Iterator<Item = &Artifact> {
        self.artifacts
            .iter()
            .filter(move |a| a.is_theorem(polarity) && !a.name.ends_with(PROOF_SUFFIX))
    }

    /// Proved theorem artifacts.
    pub fn proofs(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter().filter(|a| {
            a.is_theorem(Polarity::Positive)
                && a.name.ends_with(PROOF_SUFFIX)
                && a.status == ArtifactStatus::Succeeded
        })
    }
}

/// Suffix of the artifact holding a theorem's completed proof.
pub const PROOF_SUFFIX: &str = "_proof";

/// Name of the proof artifact for `theorem`.
pub fn proof_artifact_name(theorem: &str) -> String {
    format!("{theorem}{PROOF_SUFFIX}")
}
