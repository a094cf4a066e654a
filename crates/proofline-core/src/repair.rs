//! Compile-diagnose-repair loop.
//!
//! One [`RepairLoop::repair`] call drives a single artifact to a terminal
//! state: generate a candidate, check it against the candidate rules,
//! materialize it, run the toolchain, and feed the parsed diagnostics back
//! into the next generation. The loop is bounded by the caller's budget and
//! is stateless between calls; everything an attempt knows about earlier
//! attempts is in its [`GenerationContext`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::diagnostics::DiagnosticsParser;
use crate::domain::artifact::{Artifact, ArtifactKind, ArtifactStatus};
use crate::domain::diagnostic::Diagnostic;
use crate::domain::error::GeneratorError;
use crate::domain::project::Project;
use crate::domain::unit::{FailureReason, UnitFailure, WorkUnit};
use crate::generator::{extract_code_block, ContentGenerator, GenerationContext, Prompt};
use crate::metrics::METRICS;
use crate::render::Renderer;
use crate::toolchain::{Materializer, Toolchain};

/// A check applied to a candidate before it is materialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateRule {
    /// The candidate must not contain this identifier (e.g. `sorry`).
    ForbidToken(String),
    /// The text before the first `:=` must match this statement, ignoring
    /// whitespace.
    PreserveStatement(String),
}

impl CandidateRule {
    /// `Err` carries a message explaining the violation.
    pub fn check(&self, candidate: &str) -> Result<(), String> {
        match self {
            CandidateRule::ForbidToken(token) => {
                let found = candidate
                    .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '\''))
                    .any(|word| word == token);
                if found {
                    Err(format!("candidate must not use `{token}`"))
                } else {
                    Ok(())
                }
            }
            CandidateRule::PreserveStatement(expected) => {
                let found = normalize(theorem_statement(candidate));
                if found == normalize(theorem_statement(expected)) {
                    Ok(())
                } else {
                    Err(format!(
                        "theorem statement must stay exactly `{}`",
                        normalize(theorem_statement(expected))
                    ))
                }
            }
        }
    }
}

/// Text before the first `:=`, or the whole text.
pub fn theorem_statement(source: &str) -> &str {
    source.split(":=").next().unwrap_or(source).trim()
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// What to generate and how to validate it.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairRequest {
    pub artifact_name: String,
    pub kind: ArtifactKind,
    pub prompt: Prompt,
    pub rules: Vec<CandidateRule>,
    /// Fixed context passed on every attempt (e.g. proved examples).
    pub prior: Vec<String>,
    pub seed: u64,
    /// Regenerate even if the artifact already succeeded.
    pub force: bool,
}

impl RepairRequest {
    pub fn new(
        artifact_name: impl Into<String>,
        kind: ArtifactKind,
        prompt: Prompt,
        seed: u64,
    ) -> Self {
        Self {
            artifact_name: artifact_name.into(),
            kind,
            prompt,
            rules: Vec::new(),
            prior: Vec::new(),
            seed,
            force: false,
        }
    }

    pub fn with_rule(mut self, rule: CandidateRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_prior(mut self, prior: Vec<String>) -> Self {
        self.prior = prior;
        self
    }

    pub fn forced(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// One consumed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-indexed.
    pub attempt: u32,
    /// Budget left after this attempt.
    pub remaining_budget: u32,
    /// Empty for the succeeding attempt.
    pub diagnostics: Vec<Diagnostic>,
    /// The candidate was never judged (generator or toolchain outage).
    #[serde(default)]
    pub outage: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RepairOutcome {
    Succeeded,
    /// Already succeeded before the call; nothing was generated or checked.
    AlreadySucceeded,
    Exhausted,
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepairReport {
    pub artifact: Artifact,
    pub attempts: Vec<AttemptRecord>,
    pub outcome: RepairOutcome,
}

impl RepairReport {
    pub fn succeeded(&self) -> bool {
        matches!(
            self.outcome,
            RepairOutcome::Succeeded | RepairOutcome::AlreadySucceeded
        )
    }

    /// Whether the final attempt was lost to an outage.
    pub fn ended_in_outage(&self) -> bool {
        self.attempts.last().is_some_and(|a| a.outage)
    }

    pub fn attempts_used(&self) -> u32 {
        self.attempts.len() as u32
    }

    /// The unit-level failure this report implies, if any.
    pub fn failure(&self) -> Option<UnitFailure> {
        match &self.outcome {
            RepairOutcome::Succeeded | RepairOutcome::AlreadySucceeded => None,
            RepairOutcome::Exhausted => Some(
                UnitFailure::new(
                    FailureReason::BudgetExhausted,
                    format!(
                        "{} failed after {} attempts",
                        self.artifact.name,
                        self.attempts.len()
                    ),
                )
                .with_diagnostics(self.artifact.diagnostics.clone()),
            ),
            RepairOutcome::Rejected { reason } => Some(
                UnitFailure::new(FailureReason::GeneratorRejected, reason.clone())
                    .with_diagnostics(self.artifact.diagnostics.clone()),
            ),
        }
    }
}

pub struct RepairLoop {
    generator: Arc<dyn ContentGenerator>,
    toolchain: Arc<dyn Toolchain>,
    renderer: Arc<dyn Renderer>,
    materializer: Materializer,
    parser: DiagnosticsParser,
}

impl RepairLoop {
    pub fn new(
        generator: Arc<dyn ContentGenerator>,
        toolchain: Arc<dyn Toolchain>,
        renderer: Arc<dyn Renderer>,
        materializer: Materializer,
        parser: DiagnosticsParser,
    ) -> Self {
        Self {
            generator,
            toolchain,
            renderer,
            materializer,
            parser,
        }
    }

    /// Drive `request`'s artifact on `unit` to success or budget exhaustion.
    ///
    /// `snapshot` is the committed project state the unit's dependencies are
    /// read from. The final artifact is upserted into `unit` whatever the
    /// outcome.
    #[instrument(
        skip_all,
        fields(unit = %unit.name, artifact = %request.artifact_name, budget = budget)
    )]
    pub async fn repair(
        &self,
        snapshot: &Project,
        unit: &mut WorkUnit,
        request: &RepairRequest,
        budget: u32,
    ) -> RepairReport {
        if !request.force {
            if let Some(existing) = unit.artifact(&request.artifact_name) {
                if existing.is_succeeded() && existing.kind == request.kind {
                    debug!("artifact already succeeded, skipping");
                    return RepairReport {
                        artifact: existing.clone(),
                        attempts: Vec::new(),
                        outcome: RepairOutcome::AlreadySucceeded,
                    };
                }
            }
        }

        let mut artifact = unit
            .artifact(&request.artifact_name)
            .cloned()
            .unwrap_or_else(|| Artifact::new(&request.artifact_name, request.kind));
        artifact.kind = request.kind;

        let mut attempts = Vec::new();
        // Diagnostics of the last candidate the checker actually judged.
        let mut feedback: Vec<Diagnostic> = Vec::new();
        let mut previous: Option<String> = None;

        for attempt in 1..=budget {
            METRICS.inc_repair_attempts();
            let remaining_budget = budget - attempt;

            let mut prior = request.prior.clone();
            if let Some(candidate) = &previous {
                prior.push(format!("Previous candidate:\n```lean\n{candidate}\n```"));
            }
            let context = GenerationContext {
                attempt,
                seed: request.seed,
                feedback: feedback.clone(),
                prior,
            };

            let checked = match self.generator.generate(&request.prompt, &context).await {
                Ok(response) => {
                    artifact.source = extract_code_block(&response, "lean");
                    previous = Some(artifact.source.clone());
                    self.check_candidate(snapshot, unit, &mut artifact, &request.rules)
                        .await
                }
                Err(GeneratorError::Unavailable(msg)) => Err(Diagnostic::error(format!(
                    "generator unavailable: {msg}"
                ))),
                Err(e) => {
                    warn!(attempt, error = %e, "generation rejected");
                    artifact.status = ArtifactStatus::Failed;
                    artifact.diagnostics = vec![Diagnostic::error(e.to_string())];
                    attempts.push(AttemptRecord {
                        attempt,
                        remaining_budget,
                        diagnostics: artifact.diagnostics.clone(),
                        outage: false,
                    });
                    unit.upsert_artifact(artifact.clone());
                    return RepairReport {
                        artifact,
                        attempts,
                        outcome: RepairOutcome::Rejected {
                            reason: e.to_string(),
                        },
                    };
                }
            };

            let diagnostics = match checked {
                Ok(diagnostics) => diagnostics,
                Err(outage) => {
                    warn!(
                        attempt,
                        remaining_budget,
                        error = %outage.message,
                        "attempt lost to an outage"
                    );
                    artifact.status = ArtifactStatus::Failed;
                    artifact.diagnostics = vec![outage.clone()];
                    attempts.push(AttemptRecord {
                        attempt,
                        remaining_budget,
                        diagnostics: vec![outage],
                        outage: true,
                    });
                    continue;
                }
            };

            if diagnostics.is_empty() {
                info!(attempt, "artifact checked");
                artifact.status = ArtifactStatus::Succeeded;
                artifact.diagnostics.clear();
                attempts.push(AttemptRecord {
                    attempt,
                    remaining_budget,
                    diagnostics: Vec::new(),
                    outage: false,
                });
                unit.upsert_artifact(artifact.clone());
                return RepairReport {
                    artifact,
                    attempts,
                    outcome: RepairOutcome::Succeeded,
                };
            }

            debug!(
                attempt,
                remaining_budget,
                diagnostics = diagnostics.len(),
                "attempt failed"
            );
            artifact.status = ArtifactStatus::Failed;
            artifact.diagnostics = diagnostics.clone();
            attempts.push(AttemptRecord {
                attempt,
                remaining_budget,
                diagnostics: diagnostics.clone(),
                outage: false,
            });
            feedback = diagnostics;
        }

        warn!(attempts = attempts.len(), "repair budget exhausted");
        unit.upsert_artifact(artifact.clone());
        RepairReport {
            artifact,
            attempts,
            outcome: RepairOutcome::Exhausted,
        }
    }

    /// `Ok` with no diagnostics means the candidate checked. `Err` means
    /// the candidate was never judged (write or toolchain failure).
    async fn check_candidate(
        &self,
        snapshot: &Project,
        unit: &WorkUnit,
        artifact: &mut Artifact,
        rules: &[CandidateRule],
    ) -> Result<Vec<Diagnostic>, Diagnostic> {
        let violations: Vec<Diagnostic> = rules
            .iter()
            .filter_map(|rule| rule.check(&artifact.source).err())
            .map(Diagnostic::error)
            .collect();
        if !violations.is_empty() {
            return Ok(violations);
        }

        let rendered = self.renderer.render(snapshot, unit, artifact);
        artifact.path = rendered.path.to_string_lossy().into_owned();
        if let Err(e) = self.materializer.write(&rendered.path, &rendered.content) {
            return Err(Diagnostic::error(format!(
                "failed to write {}: {e}",
                rendered.path.display()
            )));
        }

        match self
            .toolchain
            .check(self.materializer.root(), &rendered.path)
            .await
        {
            Ok(outcome) if outcome.ok => Ok(Vec::new()),
            Ok(outcome) => Ok(self.parser.parse_failure(&outcome.raw_output)),
            Err(e) => Err(Diagnostic::error(format!("toolchain error: {e}"))),
        }
    }
}
