//! Observability tests for pipeline lifecycle tracing.
//!
//! Every emitter is exercised under a captured subscriber; a full run is
//! traced end to end to make sure instrumented spans survive task spawns.

use std::sync::Arc;

use proofline_core::fakes::{ScriptedGenerator, ScriptedToolchain};
use proofline_core::graph::GraphWarning;
use proofline_core::obs::{
    emit_checkpoint_saved, emit_graph_warning, emit_rank_dispatched, emit_run_finished,
    emit_run_started, emit_stage_finished, emit_stage_started, emit_unit_failed, run_span,
};
use proofline_core::{
    FailureReason, GenerationTask, Pipeline, Project, RunConfig, RunOptions, Stage, UnitKind,
    UnitRef, WorkUnit,
};
use proofline_state::fakes::MemoryCheckpointStore;
use tracing_test::traced_test;

#[traced_test]
#[test]
fn test_emit_run_lifecycle() {
    emit_run_started("run-123", "Shop", Stage::TableDependency, Stage::Proofs);
    emit_run_finished("run-123", "completed", 5000);
}

#[traced_test]
#[test]
fn test_emit_stage_and_rank_events() {
    emit_stage_started(Stage::ApiFormalization, 4);
    emit_rank_dispatched(Stage::ApiFormalization, 0, 3);
    emit_stage_finished(Stage::ApiFormalization, 3, 1);
}

/// WARN-level events are captured by traced_test
#[traced_test]
#[test]
fn test_emit_unit_failed_and_graph_warning() {
    emit_unit_failed(
        Stage::Proofs,
        &UnitRef::api("CreateUser"),
        &FailureReason::ModelTooWeak,
        "negative theorem CreateUser_req0_neg0 proved",
    );
    emit_graph_warning(
        Stage::TableFormalization,
        &GraphWarning::CycleBroken {
            from: UnitRef::table("orders"),
            to: UnitRef::table("users"),
        },
    );
}

#[traced_test]
#[test]
fn test_emit_checkpoint_saved_without_cursor() {
    emit_checkpoint_saved("Shop", None, "abc123de");
    emit_checkpoint_saved("Shop", Some(Stage::TableDependency), "abc123de");
}

#[traced_test]
#[test]
fn test_run_span_enter_creates_span() {
    let span = run_span("run-span", "Shop").entered();
    emit_stage_started(Stage::TableDependency, 1);
    drop(span);
}

#[traced_test]
#[tokio::test]
async fn test_traced_pipeline_run_completes() {
    let mut project = Project::new("Shop", RunConfig::default());
    project
        .tables
        .push(WorkUnit::new(UnitKind::Table, "users", "id, email"));

    let gen = Arc::new(ScriptedGenerator::new());
    gen.fallback(GenerationTask::TableDependencies, "[]");
    gen.fallback(
        GenerationTask::TableFormalization,
        "```lean\nstructure User where\n  id : Nat\n```",
    );

    let tree = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(
        gen,
        Arc::new(ScriptedToolchain::new()),
        tree.path(),
        Arc::new(MemoryCheckpointStore::new()),
    );
    let outcome = pipeline
        .run(
            project,
            RunOptions {
                end: Some(Stage::TableFormalization),
                ..RunOptions::default()
            },
        )
        .await
        .unwrap();
    assert!(outcome.is_completed());
}
