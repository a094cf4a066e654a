//! Domain model for the Proofline engine.

pub mod artifact;
pub mod config;
pub mod diagnostic;
pub mod error;
pub mod project;
pub mod stage;
pub mod unit;

pub use artifact::{Artifact, ArtifactKind, ArtifactStatus, Polarity};
pub use config::{RetryBudget, RunConfig};
pub use diagnostic::{Diagnostic, Location, Severity};
pub use error::{
    AnalysisError, GeneratorError, PipelineError, ProoflineError, Result, ToolchainError,
};
pub use project::{ManifestEntry, Project, ProjectBrief, ProjectManifest, StageCursor};
pub use stage::Stage;
pub use unit::{
    proof_artifact_name, FailureReason, StageRecord, UnitFailure, UnitKind, UnitRef, UnitStatus,
    WorkUnit, PROOF_SUFFIX,
};
