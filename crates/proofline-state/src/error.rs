//! Error types for proofline-state

use thiserror::Error;

/// Errors that can occur in the checkpoint persistence layer
#[derive(Error, Debug)]
pub enum StateError {
    /// Checkpoint was written by an incompatible schema version
    #[error(
        "incompatible checkpoint for '{project}': schema version {found}, expected {expected}"
    )]
    IncompatibleCheckpoint {
        project: String,
        found: u32,
        expected: u32,
    },

    /// Envelope declares a schema version but its fields cannot be decoded
    #[error(
        "unreadable checkpoint envelope for project '{project}' (schema version {found}): {reason}"
    )]
    UnreadableEnvelope {
        project: String,
        found: u32,
        reason: String,
    },

    /// Checkpoint bytes could not be decoded or failed digest verification
    #[error("corrupt checkpoint for project '{project}': {reason}")]
    CorruptCheckpoint { project: String, reason: String },

    /// Project name cannot be used as a checkpoint key
    #[error("invalid project name: {0:?}")]
    InvalidProjectName(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}
