//! Structured lifecycle events for pipeline runs.
//!
//! Every event is an `info!` (or `warn!` for failures) carrying an
//! `event = "<name>"` field so log pipelines can filter on it.

use tracing::{info, warn};

use crate::domain::stage::Stage;
use crate::domain::unit::{FailureReason, UnitRef};
use crate::graph::GraphWarning;

/// The span every event of one run is recorded under. The pipeline
/// attaches it with `Instrument` so it follows the run across awaits.
pub fn run_span(run_id: &str, project: &str) -> tracing::Span {
    tracing::info_span!("proofline.run", run_id = %run_id, project = %project)
}

pub fn emit_run_started(run_id: &str, project: &str, start: Stage, end: Stage) {
    info!(
        event = "run.started",
        run_id = %run_id,
        project = %project,
        start = %start,
        end = %end,
    );
}

pub fn emit_run_finished(run_id: &str, outcome: &str, duration_ms: u64) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        outcome = %outcome,
        duration_ms = duration_ms,
    );
}

pub fn emit_stage_started(stage: Stage, units: usize) {
    info!(event = "stage.started", stage = %stage, units = units);
}

pub fn emit_stage_finished(stage: Stage, succeeded: usize, failed: usize) {
    info!(
        event = "stage.finished",
        stage = %stage,
        succeeded = succeeded,
        failed = failed,
    );
}

pub fn emit_rank_dispatched(stage: Stage, rank: usize, units: usize) {
    info!(event = "rank.dispatched", stage = %stage, rank = rank, units = units);
}

pub fn emit_unit_failed(stage: Stage, unit: &UnitRef, reason: &FailureReason, detail: &str) {
    warn!(
        event = "unit.failed",
        stage = %stage,
        unit = %unit,
        reason = %reason,
        detail = %detail,
    );
}

pub fn emit_checkpoint_saved(project: &str, cursor: Option<Stage>, digest: &str) {
    info!(
        event = "checkpoint.saved",
        project = %project,
        cursor = cursor.map(Stage::as_str).unwrap_or("none"),
        digest = %digest,
    );
}

pub fn emit_graph_warning(stage: Stage, warning: &GraphWarning) {
    warn!(event = "graph.warning", stage = %stage, warning = %warning);
}
