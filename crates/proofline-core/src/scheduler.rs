//! Dependency-ordered concurrent scheduler.
//!
//! A stage is executed rank by rank. Within a rank every runnable unit gets
//! its own task, bounded by a semaphore of `max_workers` permits. A task
//! owns a working copy of its unit and hands it back as a [`UnitCommit`];
//! the project is only mutated here, after the whole rank has drained.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, instrument, warn, Instrument};

use crate::domain::error::PipelineError;
use crate::domain::project::Project;
use crate::domain::stage::Stage;
use crate::domain::unit::{
    FailureReason, StageRecord, UnitFailure, UnitKind, UnitRef, UnitStatus, WorkUnit,
};
use crate::graph::DependencyGraph;
use crate::metrics::METRICS;
use crate::obs;

/// What a unit task hands back to the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitCommit {
    /// The task's working copy, committed into the project as-is.
    pub unit: WorkUnit,
    pub attempts: u32,
    pub failure: Option<UnitFailure>,
}

impl UnitCommit {
    pub fn succeeded(unit: WorkUnit, attempts: u32) -> Self {
        Self {
            unit,
            attempts,
            failure: None,
        }
    }

    pub fn failed(unit: WorkUnit, attempts: u32, failure: UnitFailure) -> Self {
        Self {
            unit,
            attempts,
            failure: Some(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    fn record(&self) -> StageRecord {
        match &self.failure {
            None => StageRecord::succeeded(self.attempts),
            Some(f) => StageRecord::failed(self.attempts, f.clone()),
        }
    }
}

/// Units of one rank, split by whether they may run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedRank {
    pub rank: usize,
    pub runnable: Vec<UnitRef>,
    /// `(unit, failed dependency)` pairs that must not run.
    pub blocked: Vec<(UnitRef, UnitRef)>,
}

/// Walks a graph's levels, blocking units whose dependencies failed.
#[derive(Debug, Clone)]
pub struct RankPlan {
    graph: DependencyGraph,
    levels: Vec<Vec<UnitRef>>,
    next: usize,
    failed: BTreeSet<UnitRef>,
}

impl RankPlan {
    pub fn new(graph: DependencyGraph, kinds: &[UnitKind]) -> Self {
        let levels = graph.levels_for(kinds);
        Self {
            graph,
            levels,
            next: 0,
            failed: BTreeSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn next_rank(&mut self) -> Option<PlannedRank> {
        let level = self.levels.get(self.next)?.clone();
        let rank = self.next;
        self.next += 1;

        let mut runnable = Vec::new();
        let mut blocked = Vec::new();
        for unit in level {
            let failed_dep = self
                .graph
                .dependencies(&unit)
                .find(|d| self.failed.contains(*d))
                .cloned();
            match failed_dep {
                Some(dep) => {
                    self.failed.insert(unit.clone());
                    blocked.push((unit, dep));
                }
                None => runnable.push(unit),
            }
        }
        Some(PlannedRank {
            rank,
            runnable,
            blocked,
        })
    }

    /// Record the terminal outcome of a unit dispatched from this plan.
    pub fn record(&mut self, unit: &UnitRef, succeeded: bool) {
        if !succeeded {
            self.failed.insert(unit.clone());
        }
    }
}

/// Cooperative stop signal, polled between ranks and stages.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StopHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request a stop; in-flight ranks still drain.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Called after each rank's results are committed into the project.
#[async_trait]
pub trait RankHook: Send + Sync {
    async fn rank_committed(
        &self,
        project: &Project,
        stage: Stage,
        rank: usize,
    ) -> Result<(), PipelineError>;
}

#[async_trait]
impl RankHook for () {
    async fn rank_committed(&self, _: &Project, _: Stage, _: usize) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// Per-stage result of [`Scheduler::run_ranked`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageRun {
    pub succeeded: Vec<UnitRef>,
    pub failed: Vec<UnitRef>,
    /// A stop was observed before every rank ran.
    pub stopped: bool,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    max_workers: usize,
}

impl Scheduler {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Run `task` once per unit, at most `max_workers` at a time.
    ///
    /// Every unit gets an entry in the result. A panicking task is recorded
    /// as `TaskPanicked` for its unit with the unit as it was dispatched;
    /// siblings are unaffected.
    #[instrument(skip_all, fields(units = units.len(), max_workers = self.max_workers))]
    pub async fn run_rank<F, Fut>(
        &self,
        snapshot: Arc<Project>,
        units: Vec<WorkUnit>,
        task: Arc<F>,
    ) -> BTreeMap<UnitRef, UnitCommit>
    where
        F: Fn(Arc<Project>, WorkUnit) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = UnitCommit> + Send + 'static,
    {
        let sem = Arc::new(Semaphore::new(self.max_workers));
        let mut dispatched = Vec::with_capacity(units.len());
        let mut handles = Vec::with_capacity(units.len());

        for unit in units {
            dispatched.push(unit.clone());
            let sem = Arc::clone(&sem);
            let task = Arc::clone(&task);
            let snapshot = Arc::clone(&snapshot);
            handles.push(tokio::spawn(
                async move {
                    let _permit = sem.acquire_owned().await.ok();
                    task(snapshot, unit).await
                }
                .in_current_span(),
            ));
        }

        let joined = join_all(handles).await;
        let mut results = BTreeMap::new();
        for (unit, outcome) in dispatched.into_iter().zip(joined) {
            let unit_ref = unit.unit_ref();
            let commit = match outcome {
                Ok(commit) => commit,
                Err(e) => {
                    warn!(unit = %unit_ref, error = %e, "unit task panicked");
                    UnitCommit::failed(
                        unit,
                        0,
                        UnitFailure::new(FailureReason::TaskPanicked, e.to_string()),
                    )
                }
            };
            results.insert(unit_ref, commit);
        }
        results
    }

    /// Run every rank of `plan` for `stage`, committing each rank into
    /// `project` before the next one is dispatched.
    ///
    /// Units already `Succeeded` for `stage` are skipped unless `force`.
    /// A unit whose dependency failed is recorded `DependencyFailed`
    /// without running.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip_all, fields(stage = %stage, ranks = plan.len()))]
    pub async fn run_ranked<F, Fut>(
        &self,
        project: &mut Project,
        stage: Stage,
        mut plan: RankPlan,
        force: bool,
        task: F,
        hook: &dyn RankHook,
        stop: &StopHandle,
    ) -> Result<StageRun, PipelineError>
    where
        F: Fn(Arc<Project>, WorkUnit) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = UnitCommit> + Send + 'static,
    {
        let task = Arc::new(task);
        let mut run = StageRun::default();

        while let Some(planned) = plan.next_rank() {
            if stop.is_stopped() {
                debug!(rank = planned.rank, "stop requested, leaving stage");
                run.stopped = true;
                return Ok(run);
            }

            for (unit, dep) in &planned.blocked {
                let failure = UnitFailure::new(
                    FailureReason::DependencyFailed,
                    format!("dependency {dep} failed in {stage}"),
                );
                obs::emit_unit_failed(stage, unit, &failure.reason, &failure.detail);
                METRICS.inc_unit_outcome(false);
                if let Some(u) = project.unit_mut(unit) {
                    u.set_stage(stage, StageRecord::failed(0, failure));
                }
                run.failed.push(unit.clone());
            }

            let mut dispatch = Vec::new();
            for unit_ref in &planned.runnable {
                let Some(unit) = project.unit(unit_ref) else {
                    continue;
                };
                if !force && unit.stage_status(stage) == UnitStatus::Succeeded {
                    debug!(unit = %unit_ref, "already succeeded, skipping");
                    plan.record(unit_ref, true);
                    run.succeeded.push(unit_ref.clone());
                    continue;
                }
                let mut copy = unit.clone();
                copy.set_stage(
                    stage,
                    StageRecord {
                        status: UnitStatus::InProgress,
                        ..StageRecord::default()
                    },
                );
                dispatch.push(copy);
            }

            if !dispatch.is_empty() {
                obs::emit_rank_dispatched(stage, planned.rank, dispatch.len());
                let snapshot = Arc::new(project.clone());
                let commits = self.run_rank(snapshot, dispatch, Arc::clone(&task)).await;

                for (unit_ref, commit) in commits {
                    let succeeded = commit.is_success();
                    let record = commit.record();
                    if let Some(f) = &commit.failure {
                        obs::emit_unit_failed(stage, &unit_ref, &f.reason, &f.detail);
                    }
                    METRICS.inc_unit_outcome(succeeded);

                    let mut unit = commit.unit;
                    unit.set_stage(stage, record);
                    if project.replace_unit(unit).is_err() {
                        return Err(PipelineError::CommitRejected {
                            unit: unit_ref.to_string(),
                        });
                    }

                    plan.record(&unit_ref, succeeded);
                    if succeeded {
                        run.succeeded.push(unit_ref);
                    } else {
                        run.failed.push(unit_ref);
                    }
                }
            }

            hook.rank_committed(project, stage, planned.rank).await?;
        }

        Ok(run)
    }
}
