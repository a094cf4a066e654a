//! Per-stage unit tasks.

use std::sync::Arc;

use tracing::debug;

use crate::analysis::Analyzer;
use crate::domain::artifact::ArtifactKind;
use crate::domain::config::RunConfig;
use crate::domain::error::AnalysisError;
use crate::domain::project::Project;
use crate::domain::stage::Stage;
use crate::domain::unit::{FailureReason, UnitFailure, UnitKind, WorkUnit};
use crate::generator::{GenerationTask, Prompt};
use crate::proof::{select_examples, ProofController};
use crate::repair::{RepairLoop, RepairRequest};
use crate::scheduler::UnitCommit;

/// Everything a unit task needs, shared by all tasks of a stage.
pub(crate) struct StageContext {
    pub stage: Stage,
    pub config: RunConfig,
    pub force: bool,
    pub analyzer: Analyzer,
    pub repair: Arc<RepairLoop>,
    pub prover: ProofController,
}

impl StageContext {
    pub async fn execute(&self, snapshot: &Project, unit: WorkUnit) -> UnitCommit {
        debug!(stage = %self.stage, unit = %unit.name, "unit task started");
        match self.stage {
            Stage::TableDependency | Stage::ApiDependency => {
                self.dependencies(snapshot, unit).await
            }
            Stage::TableFormalization | Stage::ApiFormalization => {
                self.formalize(snapshot, unit).await
            }
            Stage::ApiRequirements => self.claims(unit, GenerationTask::ApiRequirements).await,
            Stage::TableProperties => self.claims(unit, GenerationTask::TableProperties).await,
            Stage::ApiTheorems | Stage::TableTheorems => self.theorems(snapshot, unit).await,
            Stage::Proofs => {
                let examples = select_examples(
                    snapshot,
                    self.config.random_seed,
                    self.config.proof_example_count,
                );
                self.prover
                    .prove_unit(snapshot, unit, &examples, self.force)
                    .await
            }
        }
    }

    async fn dependencies(&self, snapshot: &Project, mut unit: WorkUnit) -> UnitCommit {
        match self.analyzer.dependencies(snapshot, &unit).await {
            Ok(analysis) => {
                unit.dependencies = analysis.value;
                UnitCommit::succeeded(unit, analysis.attempts)
            }
            Err(e) => analysis_failure(unit, e, self.config.max_analysis_retries),
        }
    }

    async fn claims(&self, mut unit: WorkUnit, task: GenerationTask) -> UnitCommit {
        match self.analyzer.claims(&unit, task).await {
            Ok(analysis) => {
                unit.requirements = analysis.value;
                UnitCommit::succeeded(unit, analysis.attempts)
            }
            Err(e) => analysis_failure(unit, e, self.config.max_analysis_retries),
        }
    }

    async fn formalize(&self, snapshot: &Project, mut unit: WorkUnit) -> UnitCommit {
        let kind = match unit.kind {
            UnitKind::Table => ArtifactKind::Structure,
            UnitKind::Api => ArtifactKind::Function,
        };
        let request = RepairRequest::new(
            unit.name.clone(),
            kind,
            formalization_prompt(snapshot, &unit),
            self.config.random_seed,
        )
        .forced(self.force);

        let report = self
            .repair
            .repair(snapshot, &mut unit, &request, self.config.max_formalization_retries)
            .await;
        let attempts = report.attempts_used();
        match report.failure() {
            None => UnitCommit::succeeded(unit, attempts),
            Some(f) => UnitCommit::failed(unit, attempts, f),
        }
    }

    /// One compiling statement per claim, each ending in `sorry`.
    async fn theorems(&self, snapshot: &Project, mut unit: WorkUnit) -> UnitCommit {
        let infix = match unit.kind {
            UnitKind::Table => "prop",
            UnitKind::Api => "req",
        };
        let task = match unit.kind {
            UnitKind::Table => GenerationTask::TableTheorem,
            UnitKind::Api => GenerationTask::ApiTheorem,
        };

        let claims = unit.requirements.clone();
        let mut attempts = 0;
        let mut failures: Vec<UnitFailure> = Vec::new();
        for (i, claim) in claims.iter().enumerate() {
            let name = format!("{}_{infix}{i}", unit.name);
            let request = RepairRequest::new(
                &name,
                ArtifactKind::positive_theorem(),
                statement_prompt(&unit, task, &name, claim),
                self.config.random_seed,
            )
            .forced(self.force);
            let report = self
                .repair
                .repair(snapshot, &mut unit, &request, self.config.max_formalization_retries)
                .await;
            attempts += report.attempts_used();
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
                        format!("{} (and {} more failing statements)", first.detail, n - 1);
                }
                UnitCommit::failed(unit, attempts, first)
            }
        }
    }
}

fn analysis_failure(unit: WorkUnit, error: AnalysisError, budget: u32) -> UnitCommit {
    let (reason, attempts) = match &error {
        AnalysisError::Rejected(_) => (FailureReason::GeneratorRejected, 1),
        AnalysisError::Malformed { attempts, .. } => {
            (FailureReason::AnalysisFailed, (*attempts).min(budget))
        }
    };
    UnitCommit::failed(unit, attempts, UnitFailure::new(reason, error.to_string()))
}

fn formalization_prompt(snapshot: &Project, unit: &WorkUnit) -> Prompt {
    let mut context = String::new();
    for dep in &unit.dependencies {
        let Some(dep_unit) = snapshot.unit(dep) else {
            continue;
        };
        let structure = dep_unit
            .artifacts
            .iter()
            .find(|a| a.name == dep_unit.name && a.is_succeeded());
        if let Some(a) = structure {
            context.push_str(&format!("\n## {dep}\n```lean\n{}\n```\n", a.source));
        }
    }

    let (task, instructions) = match unit.kind {
        UnitKind::Table => (
            GenerationTask::TableFormalization,
            "Formalize this table as a Lean 4 structure. Answer with a ```lean block.",
        ),
        UnitKind::Api => (
            GenerationTask::ApiFormalization,
            "Formalize this API as a Lean 4 function over the given structures. \
             Answer with a ```lean block.",
        ),
    };
    let mut body = format!("# {} `{}`\n\n{}\n", unit.kind, unit.name, unit.description);
    if !context.is_empty() {
        body.push_str("\n# Dependencies\n");
        body.push_str(&context);
    }
    Prompt::new(task, &unit.name, instructions, body)
}

fn statement_prompt(unit: &WorkUnit, task: GenerationTask, name: &str, claim: &str) -> Prompt {
    let model = unit
        .artifacts
        .iter()
        .find(|a| a.name == unit.name)
        .map(|a| a.source.as_str())
        .unwrap_or("");
    Prompt::new(
        task,
        &unit.name,
        format!(
            "State the claim as a Lean 4 theorem named `{name}` with the proof left as \
             `sorry`. Answer with a ```lean block."
        ),
        format!("# Model\n```lean\n{model}\n```\n\n# Claim\n{claim}\n"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::artifact::{Artifact, ArtifactStatus};
    use crate::domain::unit::UnitRef;

    #[test]
    fn formalization_prompt_includes_succeeded_dependencies() {
        let mut p = Project::new("Shop", RunConfig::default());
        let mut users = WorkUnit::new(UnitKind::Table, "users", "");
        let mut a = Artifact::new("users", ArtifactKind::Structure);
        a.source = "structure User where\n  id : Nat".to_string();
        a.status = ArtifactStatus::Succeeded;
        users.upsert_artifact(a);
        p.tables.push(users);

        let mut create = WorkUnit::new(UnitKind::Api, "CreateUser", "POST /users");
        create.dependencies.push(UnitRef::table("users"));

        let prompt = formalization_prompt(&p, &create);
        assert_eq!(prompt.task, GenerationTask::ApiFormalization);
        assert!(prompt.body.contains("structure User where"));
        assert!(prompt.body.contains("POST /users"));
    }

    #[test]
    fn malformed_analysis_maps_to_analysis_failed() {
        let unit = WorkUnit::new(UnitKind::Table, "users", "");
        let commit = analysis_failure(
            unit,
            AnalysisError::Malformed {
                attempts: 3,
                reason: "bad json".to_string(),
            },
            3,
        );
        let failure = commit.failure.unwrap();
        assert_eq!(failure.reason, FailureReason::AnalysisFailed);
        assert_eq!(commit.attempts, 3);
    }
}
