//! Error taxonomy for the Proofline engine.
//!
//! Per-unit failures (budget exhaustion, weak models, rejected generations)
//! are data recorded on the unit, see [`crate::domain::unit::UnitFailure`].
//! The types here cover failures of a component call or of the whole run.

use proofline_state::StateError;

/// Errors from a content generator backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GeneratorError {
    /// Transient failure (network, rate limit, timeout). Retryable.
    #[error("generator unavailable: {0}")]
    Unavailable(String),

    /// The backend refused the request (content policy, bad request).
    #[error("generator rejected request: {0}")]
    Rejected(String),

    /// No backend can serve the request as configured.
    #[error("generator misconfigured: {0}")]
    Misconfigured(String),
}

impl GeneratorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GeneratorError::Unavailable(_))
    }
}

/// Errors invoking the external checker.
#[derive(Debug, thiserror::Error)]
pub enum ToolchainError {
    #[error("toolchain command is empty")]
    EmptyCommand,

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("toolchain timed out after {secs} seconds")]
    Timeout { secs: u64 },

    #[error("toolchain io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors producing structured analysis output.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    #[error("analysis rejected: {0}")]
    Rejected(String),

    #[error("malformed analysis output after {attempts} attempts: {reason}")]
    Malformed { attempts: u32, reason: String },
}

/// Errors that abort a pipeline run before or between stages.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(
        "incompatible checkpoint for '{project}': schema version {found}, expected {expected}"
    )]
    IncompatibleCheckpoint {
        project: String,
        found: u32,
        expected: u32,
    },

    #[error("checkpoint store error: {0}")]
    Checkpoint(#[from] StateError),

    #[error("invalid stage range: {start} is after {end}")]
    InvalidStageRange { start: String, end: String },

    #[error("unit task returned {unit}, which is not part of the project")]
    CommitRejected { unit: String },

    #[error("checkpoint belongs to project '{found}', expected '{expected}'")]
    ProjectMismatch { found: String, expected: String },
}

/// Top-level Proofline errors.
#[derive(Debug, thiserror::Error)]
pub enum ProoflineError {
    #[error("unknown stage: {0}")]
    UnknownStage(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid project manifest: {0}")]
    InvalidManifest(String),

    #[error("unknown unit: {0}")]
    UnknownUnit(String),

    #[error(transparent)]
    Generator(#[from] GeneratorError),

    #[error(transparent)]
    Toolchain(#[from] ToolchainError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StateError> for ProoflineError {
    fn from(e: StateError) -> Self {
        ProoflineError::Pipeline(PipelineError::from(e))
    }
}

/// Result type for Proofline operations.
pub type Result<T> = std::result::Result<T, ProoflineError>;
