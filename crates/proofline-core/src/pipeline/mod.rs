//! Pipeline state machine.
//!
//! Stages run strictly in order within `[start, end]`. After each stage the
//! project is checkpointed; a stage with any failed unit halts the run and
//! records itself as the resume point in the project's cursor.

mod stages;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use proofline_state::CheckpointStore;
use serde::Serialize;
use tracing::{info, Instrument};
use uuid::Uuid;

use crate::analysis::Analyzer;
use crate::checkpoint::Checkpointer;
use crate::diagnostics::{DiagnosticsParser, DiagnosticsParserConfig};
use crate::domain::diagnostic::Diagnostic;
use crate::domain::error::{PipelineError, Result};
use crate::domain::project::Project;
use crate::domain::stage::Stage;
use crate::domain::unit::{FailureReason, UnitKind, UnitRef, WorkUnit};
use crate::generator::ContentGenerator;
use crate::graph::DependencyGraph;
use crate::metrics::METRICS;
use crate::obs;
use crate::proof::ProofController;
use crate::render::{LeanRenderer, Renderer};
use crate::repair::RepairLoop;
use crate::scheduler::{RankPlan, Scheduler, StopHandle};
use crate::toolchain::{Materializer, Toolchain};

use stages::StageContext;

/// Which part of the pipeline to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Overrides the resume point when set.
    pub start: Option<Stage>,
    pub end: Option<Stage>,
    /// Continue from the stored checkpoint.
    pub resume: bool,
    /// Re-run units that already succeeded.
    pub force: bool,
}

/// Why one unit failed the halting stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureSummary {
    pub unit: UnitRef,
    pub reason: FailureReason,
    pub detail: String,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every stage through the end stage succeeded for every unit.
    Completed { project: Project },
    /// `stage` had failing units; later stages did not run.
    Halted {
        stage: Stage,
        failures: Vec<FailureSummary>,
        project: Project,
    },
    /// A stop was requested; `next_stage` is where a resumed run picks up.
    Stopped { next_stage: Stage, project: Project },
}

impl RunOutcome {
    pub fn project(&self) -> &Project {
        match self {
            RunOutcome::Completed { project }
            | RunOutcome::Halted { project, .. }
            | RunOutcome::Stopped { project, .. } => project,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Completed { .. } => "completed",
            RunOutcome::Halted { .. } => "halted",
            RunOutcome::Stopped { .. } => "stopped",
        }
    }
}

pub struct Pipeline {
    generator: Arc<dyn ContentGenerator>,
    toolchain: Arc<dyn Toolchain>,
    renderer: Arc<dyn Renderer>,
    tree_root: PathBuf,
    parser_config: DiagnosticsParserConfig,
    checkpointer: Checkpointer,
    stop: StopHandle,
}

impl Pipeline {
    /// `tree_root` is where the target-language project tree lives.
    pub fn new(
        generator: Arc<dyn ContentGenerator>,
        toolchain: Arc<dyn Toolchain>,
        tree_root: impl Into<PathBuf>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            generator,
            toolchain,
            renderer: Arc::new(LeanRenderer),
            tree_root: tree_root.into(),
            parser_config: DiagnosticsParserConfig::default(),
            checkpointer: Checkpointer::new(store),
            stop: StopHandle::new(),
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_parser_config(mut self, config: DiagnosticsParserConfig) -> Self {
        self.parser_config = config;
        self
    }

    /// Handle that stops the run at the next rank or stage boundary.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn checkpointer(&self) -> &Checkpointer {
        &self.checkpointer
    }

    /// Run `project` through the selected stages.
    ///
    /// With `resume`, the stored checkpoint replaces `project` (keeping
    /// `project`'s configuration) and execution begins at its cursor's
    /// resume stage unless `options.start` is set.
    pub async fn run(&self, project: Project, options: RunOptions) -> Result<RunOutcome> {
        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id, &project.name);
        self.run_inner(run_id, project, options).instrument(span).await
    }

    async fn run_inner(
        &self,
        run_id: String,
        project: Project,
        options: RunOptions,
    ) -> Result<RunOutcome> {
        project.config.validate()?;
        let started = Instant::now();

        let mut project = if options.resume {
            match self.checkpointer.load(&project.name).await? {
                Some(mut saved) => {
                    info!(cursor = ?saved.cursor, "resuming from checkpoint");
                    saved.config = project.config;
                    saved
                }
                None => {
                    info!("no checkpoint found, starting fresh");
                    project
                }
            }
        } else {
            project
        };

        let inferred = if options.resume {
            project.cursor.resume_stage()
        } else {
            Some(Stage::first())
        };
        let start = match options.start.or(inferred) {
            Some(stage) => stage,
            None => {
                info!("checkpoint already covers every stage");
                return Ok(RunOutcome::Completed { project });
            }
        };
        let end = options.end.unwrap_or_else(Stage::last);
        if start > end {
            return Err(PipelineError::InvalidStageRange {
                start: start.to_string(),
                end: end.to_string(),
            }
            .into());
        }

        obs::emit_run_started(&run_id, &project.name, start, end);
        let brief = project.brief();
        info!(
            event = "project.brief",
            tables = brief.tables,
            apis = brief.apis,
            requirements = brief.requirements,
            theorems = brief.theorems,
            proofs = brief.proofs,
        );

        let outcome = self.run_stages(&mut project, start, end, options.force).await?;
        let outcome = match outcome {
            StagesEnd::Completed => RunOutcome::Completed { project },
            StagesEnd::Halted { stage, failures } => RunOutcome::Halted {
                stage,
                failures,
                project,
            },
            StagesEnd::Stopped { next_stage } => RunOutcome::Stopped { next_stage, project },
        };

        METRICS.flush();
        obs::emit_run_finished(
            &run_id,
            outcome.label(),
            started.elapsed().as_millis() as u64,
        );
        Ok(outcome)
    }

    async fn run_stages(
        &self,
        project: &mut Project,
        start: Stage,
        end: Stage,
        force: bool,
    ) -> Result<StagesEnd> {
        for stage in Stage::range(start, end) {
            if self.stop.is_stopped() {
                self.checkpointer.save(project).await?;
                return Ok(StagesEnd::Stopped { next_stage: stage });
            }

            let kinds = stage.unit_kinds();
            let unit_count: usize = kinds.iter().map(|k| project.units(*k).len()).sum();
            obs::emit_stage_started(stage, unit_count);

            let graph = if stage.is_ranked() {
                let (graph, warnings) = DependencyGraph::from_project(project);
                for w in &warnings {
                    obs::emit_graph_warning(stage, w);
                }
                graph
            } else {
                flat_graph(project, kinds)
            };
            let plan = RankPlan::new(graph, kinds);

            let ctx = Arc::new(self.stage_context(project, stage, force));
            let task = move |snapshot: Arc<Project>, unit: WorkUnit| {
                let ctx = Arc::clone(&ctx);
                async move { ctx.execute(&snapshot, unit).await }
            };

            let scheduler = Scheduler::new(project.config.max_workers);
            let run = scheduler
                .run_ranked(project, stage, plan, force, task, &self.checkpointer, &self.stop)
                .await?;
            obs::emit_stage_finished(stage, run.succeeded.len(), run.failed.len());

            if run.stopped {
                self.checkpointer.save(project).await?;
                return Ok(StagesEnd::Stopped { next_stage: stage });
            }

            if !run.failed.is_empty() {
                project.cursor.halted = Some(stage);
                self.checkpointer.save(project).await?;
                let failures = failure_summaries(project, stage, &run.failed);
                return Ok(StagesEnd::Halted { stage, failures });
            }

            project.cursor.last_completed = Some(stage);
            project.cursor.halted = None;
            self.checkpointer.save(project).await?;
        }
        Ok(StagesEnd::Completed)
    }

    fn stage_context(&self, project: &Project, stage: Stage, force: bool) -> StageContext {
        let config = project.config.clone();
        let repair = Arc::new(RepairLoop::new(
            Arc::clone(&self.generator),
            Arc::clone(&self.toolchain),
            Arc::clone(&self.renderer),
            Materializer::new(&self.tree_root),
            DiagnosticsParser::new(self.parser_config.clone()),
        ));
        StageContext {
            stage,
            force,
            analyzer: Analyzer::new(
                Arc::clone(&self.generator),
                config.max_analysis_retries,
                config.random_seed,
            ),
            prover: ProofController::new(Arc::clone(&repair), config.budget, config.random_seed),
            repair,
            config,
        }
    }
}

enum StagesEnd {
    Completed,
    Halted {
        stage: Stage,
        failures: Vec<FailureSummary>,
    },
    Stopped {
        next_stage: Stage,
    },
}

/// Every unit of `kinds` at rank 0.
fn flat_graph(project: &Project, kinds: &[UnitKind]) -> DependencyGraph {
    let (graph, _) = DependencyGraph::build(
        kinds
            .iter()
            .flat_map(|k| project.units(*k))
            .map(|u| (u.unit_ref(), Vec::new())),
    );
    graph
}

fn failure_summaries(project: &Project, stage: Stage, failed: &[UnitRef]) -> Vec<FailureSummary> {
    failed
        .iter()
        .filter_map(|unit_ref| {
            let unit = project.unit(unit_ref)?;
            let failure = unit.stages.get(&stage)?.failure.as_ref()?;
            Some(FailureSummary {
                unit: unit_ref.clone(),
                reason: failure.reason.clone(),
                detail: failure.detail.clone(),
                diagnostics: failure.diagnostics.clone(),
            })
        })
        .collect()
}
