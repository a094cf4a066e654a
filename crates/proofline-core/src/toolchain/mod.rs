//! Toolchain driver: checks a materialized file with the external prover.

pub mod command;
pub mod materialize;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::error::ToolchainError;

pub use command::CommandToolchain;
pub use materialize::Materializer;

/// Result of one check. `ok == false` is an expected outcome that drives
/// the repair loop, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub ok: bool,
    /// Combined stdout and stderr.
    pub raw_output: String,
}

impl CheckOutcome {
    pub fn passed(raw_output: impl Into<String>) -> Self {
        Self {
            ok: true,
            raw_output: raw_output.into(),
        }
    }

    pub fn failed(raw_output: impl Into<String>) -> Self {
        Self {
            ok: false,
            raw_output: raw_output.into(),
        }
    }
}

/// External build/check tool. May be slow and may return different
/// diagnostics for the same input across calls.
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Check `target` (relative to `tree`) inside the project tree.
    async fn check(&self, tree: &Path, target: &Path) -> Result<CheckOutcome, ToolchainError>;
}
