//! Proofline Core Library
//!
//! Orchestration engine that turns a backend's tables and documented APIs
//! into a checked formal model: a stage pipeline over dependency-ranked
//! work units, each driven through a generate-check-repair loop against an
//! external proof toolchain.

pub mod analysis;
pub mod checkpoint;
pub mod diagnostics;
pub mod domain;
pub mod fakes;
pub mod generator;
pub mod graph;
pub mod metrics;
pub mod obs;
pub mod pipeline;
pub mod proof;
pub mod render;
pub mod repair;
pub mod scheduler;
pub mod telemetry;
pub mod toolchain;

pub use domain::{
    Artifact, ArtifactKind, ArtifactStatus, Diagnostic, FailureReason, GeneratorError, Location,
    PipelineError, Polarity, Project, ProjectManifest, ProoflineError, Result, RetryBudget,
    RunConfig, Severity, Stage, StageCursor, ToolchainError, UnitFailure, UnitKind, UnitRef,
    UnitStatus, WorkUnit,
};

pub use analysis::{Analysis, Analyzer};
pub use checkpoint::{Checkpointer, CHECKPOINT_SCHEMA_VERSION};
pub use diagnostics::{DiagnosticsParser, DiagnosticsParserConfig};
pub use generator::{
    BackendRouter, BackendRouterConfig, ContentGenerator, GenerationContext, GenerationTask,
    HttpBackendConfig, HttpChatGenerator, Prompt, RetryingGenerator,
};
pub use graph::{DependencyGraph, GraphWarning};
pub use pipeline::{FailureSummary, Pipeline, RunOptions, RunOutcome};
pub use proof::{ProofController, ProofOutcome, ProofReport};
pub use render::{LeanRenderer, RenderedFile, Renderer};
pub use repair::{
    AttemptRecord, CandidateRule, RepairLoop, RepairOutcome, RepairReport, RepairRequest,
};
pub use scheduler::{RankPlan, Scheduler, StopHandle, UnitCommit};
pub use toolchain::{CheckOutcome, CommandToolchain, Materializer, Toolchain};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
