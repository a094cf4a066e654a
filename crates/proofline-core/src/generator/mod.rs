//! Content generator gateway.
//!
//! Every call that produces artifact or analysis text goes through the
//! [`ContentGenerator`] trait. Backends are pluggable:
//!
//! - [`HttpChatGenerator`]: OpenAI-compatible chat completions endpoint
//! - [`BackendRouter`]: spreads calls for a model over several backends
//! - [`RetryingGenerator`]: timeout and transient-failure retry wrapper
//!
//! Prompts are stateless. Corrective feedback from earlier attempts travels
//! in an explicit [`GenerationContext`] rather than a growing conversation.

pub mod extract;
pub mod http;
pub mod retry;
pub mod router;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::diagnostic::Diagnostic;
use crate::domain::error::GeneratorError;

pub use extract::{extract_code_block, extract_json_block};
pub use http::{HttpBackendConfig, HttpChatGenerator};
pub use retry::RetryingGenerator;
pub use router::{BackendRouter, BackendRouterConfig};

/// Target of model I/O trace events.
pub const MODEL_IO_TARGET: &str = "proofline::model_io";

/// What a generation request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationTask {
    TableDependencies,
    ApiDependencies,
    TableFormalization,
    ApiFormalization,
    ApiRequirements,
    TableProperties,
    ApiTheorem,
    TableTheorem,
    Proof,
    NegativeTheorem,
}

impl GenerationTask {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationTask::TableDependencies => "table_dependencies",
            GenerationTask::ApiDependencies => "api_dependencies",
            GenerationTask::TableFormalization => "table_formalization",
            GenerationTask::ApiFormalization => "api_formalization",
            GenerationTask::ApiRequirements => "api_requirements",
            GenerationTask::TableProperties => "table_properties",
            GenerationTask::ApiTheorem => "api_theorem",
            GenerationTask::TableTheorem => "table_theorem",
            GenerationTask::Proof => "proof",
            GenerationTask::NegativeTheorem => "negative_theorem",
        }
    }
}

impl fmt::Display for GenerationTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub task: GenerationTask,
    /// Name of the unit the request is about.
    pub unit: String,
    /// Task instructions (system message).
    pub instructions: String,
    /// Task input: unit description, dependency sources, statements.
    pub body: String,
}

impl Prompt {
    pub fn new(
        task: GenerationTask,
        unit: impl Into<String>,
        instructions: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            task,
            unit: unit.into(),
            instructions: instructions.into(),
            body: body.into(),
        }
    }
}

/// Per-call context. Bounded and explicit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationContext {
    /// 1-indexed attempt number within the current loop.
    pub attempt: u32,
    pub seed: u64,
    /// Diagnostics of the previous attempt, verbatim. Empty on attempt 1.
    pub feedback: Vec<Diagnostic>,
    /// Extra context such as the previous candidate or proved examples.
    pub prior: Vec<String>,
}

impl GenerationContext {
    /// Render prompt body plus context into one user message.
    pub fn render_user_message(&self, prompt: &Prompt) -> String {
        let mut out = prompt.body.clone();
        if !self.prior.is_empty() {
            out.push_str("\n\n## Context\n");
            for item in &self.prior {
                out.push('\n');
                out.push_str(item);
                out.push('\n');
            }
        }
        if !self.feedback.is_empty() {
            out.push_str("\n\n## Previous attempt failed with\n");
            for d in &self.feedback {
                out.push('\n');
                out.push_str(&d.render());
            }
        }
        out
    }
}

/// Uniform generation capability.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &Prompt,
        context: &GenerationContext,
    ) -> Result<String, GeneratorError>;
}
