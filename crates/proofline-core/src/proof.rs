//! Proof search on top of the repair loop.
//!
//! A theorem is attempted in up to `max_global_attempts` rounds, each a
//! fresh repair loop bounded by `max_theorem_retries` and seeded with
//! `seed + round`. Once the positive proof checks, up to `max_examples`
//! negative claims are generated and each is attempted exactly once; a
//! negative that checks means the model proves things it should not.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use crate::domain::artifact::{Artifact, ArtifactKind, ArtifactStatus, Polarity};
use crate::domain::config::RetryBudget;
use crate::domain::diagnostic::Diagnostic;
use crate::domain::project::Project;
use crate::domain::unit::{proof_artifact_name, FailureReason, UnitFailure, UnitKind, WorkUnit};
use crate::generator::{GenerationTask, Prompt};
use crate::repair::{AttemptRecord, CandidateRule, RepairLoop, RepairOutcome, RepairRequest};
use crate::scheduler::UnitCommit;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProofOutcome {
    Proved,
    /// Every global attempt exhausted its retries.
    NonConvergent,
    /// The negative theorem `witness` checked.
    ModelTooWeak { witness: String },
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProofReport {
    pub theorem: String,
    pub global_attempts_used: u32,
    /// Attempts of the positive proof across all global attempts.
    pub attempts: Vec<AttemptRecord>,
    /// Diagnostics of every attempt in the final global attempt.
    pub last_round_diagnostics: Vec<Diagnostic>,
    pub outcome: ProofOutcome,
}

impl ProofReport {
    pub fn is_proved(&self) -> bool {
        self.outcome == ProofOutcome::Proved
    }

    pub fn failure(&self) -> Option<UnitFailure> {
        match &self.outcome {
            ProofOutcome::Proved => None,
            ProofOutcome::NonConvergent => Some(
                UnitFailure::new(
                    FailureReason::BudgetExhausted,
                    format!(
                        "{} did not converge in {} global attempts",
                        self.theorem, self.global_attempts_used
                    ),
                )
                .with_diagnostics(self.last_round_diagnostics.clone()),
            ),
            ProofOutcome::ModelTooWeak { witness } => Some(UnitFailure::new(
                FailureReason::ModelTooWeak,
                format!("negative theorem {witness} proved alongside {}", self.theorem),
            )),
            ProofOutcome::Rejected { reason } => Some(
                UnitFailure::new(FailureReason::GeneratorRejected, reason.clone())
                    .with_diagnostics(self.last_round_diagnostics.clone()),
            ),
        }
    }
}

pub struct ProofController {
    repair: Arc<RepairLoop>,
    budget: RetryBudget,
    seed: u64,
}

impl ProofController {
    pub fn new(repair: Arc<RepairLoop>, budget: RetryBudget, seed: u64) -> Self {
        Self {
            repair,
            budget,
            seed,
        }
    }

    /// Prove `theorem` (a statement artifact of `unit`).
    ///
    /// An already-proved theorem keeps its proof unless `force`. Its
    /// negative claims are checked again unless every one of them is
    /// recorded as refuted.
    #[instrument(skip_all, fields(unit = %unit.name, theorem = %theorem.name))]
    pub async fn prove(
        &self,
        snapshot: &Project,
        unit: &mut WorkUnit,
        theorem: &Artifact,
        examples: &[String],
        force: bool,
    ) -> ProofReport {
        let proof_name = proof_artifact_name(&theorem.name);
        if !force && unit.artifact(&proof_name).is_some_and(Artifact::is_succeeded) {
            let mut outcome = ProofOutcome::Proved;
            if !self.negatives_refuted(unit, theorem) {
                if let Some(witness) = self.check_negatives(snapshot, unit, theorem).await {
                    outcome = ProofOutcome::ModelTooWeak { witness };
                }
            }
            return ProofReport {
                theorem: theorem.name.clone(),
                global_attempts_used: 0,
                attempts: Vec::new(),
                last_round_diagnostics: Vec::new(),
                outcome,
            };
        }

        let prompt = proof_prompt(unit, theorem);
        let mut attempts = Vec::new();
        let mut last_round_diagnostics = Vec::new();
        let mut outcome = ProofOutcome::NonConvergent;
        let mut global_attempts_used = 0;

        for round in 0..self.budget.max_global_attempts {
            global_attempts_used = round + 1;
            let request = RepairRequest::new(
                &proof_name,
                ArtifactKind::positive_theorem(),
                prompt.clone(),
                self.seed.wrapping_add(u64::from(round)),
            )
            .with_rule(CandidateRule::ForbidToken("sorry".to_string()))
            .with_rule(CandidateRule::PreserveStatement(theorem.source.clone()))
            .with_prior(examples.to_vec())
            .forced(true);

            let report = self
                .repair
                .repair(snapshot, unit, &request, self.budget.max_theorem_retries)
                .await;
            last_round_diagnostics = report
                .attempts
                .iter()
                .flat_map(|a| a.diagnostics.iter().cloned())
                .collect();
            attempts.extend(report.attempts);

            match report.outcome {
                RepairOutcome::Succeeded | RepairOutcome::AlreadySucceeded => {
                    outcome = ProofOutcome::Proved;
                    break;
                }
                RepairOutcome::Rejected { reason } => {
                    outcome = ProofOutcome::Rejected { reason };
                    break;
                }
                RepairOutcome::Exhausted => {
                    warn!(round = global_attempts_used, "global attempt exhausted");
                }
            }
        }

        if outcome == ProofOutcome::Proved {
            if let Some(witness) = self.check_negatives(snapshot, unit, theorem).await {
                outcome = ProofOutcome::ModelTooWeak { witness };
            }
        }

        info!(global_attempts_used, outcome = ?outcome, "proof search finished");
        ProofReport {
            theorem: theorem.name.clone(),
            global_attempts_used,
            attempts,
            last_round_diagnostics,
            outcome,
        }
    }

    fn negatives_refuted(&self, unit: &WorkUnit, theorem: &Artifact) -> bool {
        (0..self.budget.max_examples).all(|index| {
            unit.artifact(&negative_name(&theorem.name, index))
                .is_some_and(|a| a.status == ArtifactStatus::Failed)
        })
    }

    /// First negative claim that checks, if any.
    async fn check_negatives(
        &self,
        snapshot: &Project,
        unit: &mut WorkUnit,
        theorem: &Artifact,
    ) -> Option<String> {
        for index in 0..self.budget.max_examples {
            let name = negative_name(&theorem.name, index);
            let request = RepairRequest::new(
                &name,
                ArtifactKind::negative_theorem(),
                negative_prompt(unit, theorem, &name),
                self.seed.wrapping_add(u64::from(index)),
            )
            .with_rule(CandidateRule::ForbidToken("sorry".to_string()))
            .with_prior(vec![format!("Negative claim index: {index}")])
            .forced(true);

            let report = self.repair.repair(snapshot, unit, &request, 1).await;
            let unjudged = report.ended_in_outage();
            match report.outcome {
                RepairOutcome::Succeeded => {
                    warn!(negative = %name, "negative theorem proved");
                    return Some(name);
                }
                RepairOutcome::Rejected { reason } => {
                    warn!(negative = %name, %reason, "negative theorem generation rejected");
                    mark_unrefuted(unit, &name);
                }
                _ if unjudged => mark_unrefuted(unit, &name),
                _ => {}
            }
        }
        None
    }

    /// Prove every positive theorem statement of `unit`.
    ///
    /// The unit fails if any theorem fails; its failure is the first one in
    /// statement order. All theorems are attempted regardless.
    pub async fn prove_unit(
        &self,
        snapshot: &Project,
        mut unit: WorkUnit,
        examples: &[String],
        force: bool,
    ) -> UnitCommit {
        let theorems: Vec<Artifact> = unit
            .theorems(Polarity::Positive)
            .filter(|t| t.is_succeeded())
            .cloned()
            .collect();

        let mut attempts = 0;
        let mut failures = Vec::new();
        for theorem in &theorems {
            let report = self.prove(snapshot, &mut unit, theorem, examples, force).await;
            attempts += report.attempts.len() as u32;
            if let Some(f) = report.failure() {
                failures.push(f);
            }
        }

        match failures.len() {
            0 => UnitCommit::succeeded(unit, attempts),
            n => {
                let mut first = failures.swap_remove(0);
                if n > 1 {
                    first.detail =
                        format!("{} (and {} more failing theorems)", first.detail, n - 1);
                }
                UnitCommit::failed(unit, attempts, first)
            }
        }
    }
}

/// A negative claim that was never checked cannot count as refuted.
fn mark_unrefuted(unit: &mut WorkUnit, name: &str) {
    if let Some(mut artifact) = unit.artifact(name).cloned() {
        artifact.status = ArtifactStatus::Pending;
        unit.upsert_artifact(artifact);
    }
}

fn negative_name(theorem: &str, index: u32) -> String {
    format!("{theorem}_neg{index}")
}

/// Up to `count` proved theorems of `project`, ordered by
/// `sha256("{seed}:{name}")` so the choice depends only on the seed and the
/// set of proofs.
pub fn select_examples(project: &Project, seed: u64, count: usize) -> Vec<String> {
    let mut proofs: Vec<(String, &Artifact)> = project
        .all_units()
        .flat_map(|u| u.proofs())
        .map(|a| {
            let key = hex::encode(Sha256::digest(format!("{seed}:{}", a.name).as_bytes()));
            (key, a)
        })
        .collect();
    proofs.sort_by(|a, b| a.0.cmp(&b.0));
    proofs
        .into_iter()
        .take(count)
        .map(|(_, a)| a.source.clone())
        .collect()
}

fn formalization_source(unit: &WorkUnit) -> &str {
    let kind = match unit.kind {
        UnitKind::Table => ArtifactKind::Structure,
        UnitKind::Api => ArtifactKind::Function,
    };
    unit.artifacts
        .iter()
        .find(|a| a.kind == kind)
        .map(|a| a.source.as_str())
        .unwrap_or("")
}

fn proof_prompt(unit: &WorkUnit, theorem: &Artifact) -> Prompt {
    Prompt::new(
        GenerationTask::Proof,
        &unit.name,
        "Replace `sorry` with a complete proof. Do not change the theorem statement. \
         Answer with the full theorem in a ```lean block.",
        format!(
            "# Model\n```lean\n{}\n```\n\n# Theorem\n```lean\n{}\n```",
            formalization_source(unit),
            theorem.source
        ),
    )
}

fn negative_prompt(unit: &WorkUnit, theorem: &Artifact, name: &str) -> Prompt {
    Prompt::new(
        GenerationTask::NegativeTheorem,
        &unit.name,
        format!(
            "State and prove a theorem named `{name}` that contradicts the theorem below. \
             A correct model makes this impossible. Answer in a ```lean block."
        ),
        format!(
            "# Model\n```lean\n{}\n```\n\n# Theorem\n```lean\n{}\n```",
            formalization_source(unit),
            theorem.source
        ),
    )
}
