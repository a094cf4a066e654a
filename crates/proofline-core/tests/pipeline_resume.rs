//! End-to-end pipeline runs: halting, resuming, stopping, checkpoint cadence.

use std::sync::Arc;

use proofline_core::fakes::{ScriptedGenerator, ScriptedToolchain};
use proofline_core::{
    FailureReason, GenerationTask, GeneratorError, Pipeline, PipelineError, Project,
    ProjectManifest, ProoflineError, Prompt, RunConfig, RunOptions, RunOutcome, Stage, UnitRef,
    UnitStatus, CHECKPOINT_SCHEMA_VERSION,
};
use proofline_state::fakes::MemoryCheckpointStore;
use proofline_state::{CheckpointEnvelope, CheckpointStore, FsCheckpointStore};

const MANIFEST: &str = r#"{
    "name": "Shop",
    "tables": [
        {"name": "users", "description": "id, email"},
        {"name": "products", "description": "id, price"},
        {"name": "orders", "description": "id, user_id, product_id"}
    ],
    "apis": [
        {"name": "CreateUser", "description": "POST /users creates a user"},
        {"name": "PlaceOrder", "description": "POST /orders places an order"}
    ]
}"#;

fn shop() -> Project {
    let manifest = ProjectManifest::from_json_str(MANIFEST).unwrap();
    Project::from_manifest(&manifest, RunConfig::default()).unwrap()
}

/// Text between `start` and the following `end`.
fn between<'a>(text: &'a str, start: &str, end: &str) -> &'a str {
    text.split(start)
        .nth(1)
        .and_then(|rest| rest.split(end).next())
        .unwrap_or("")
}

fn lean(code: &str) -> String {
    format!("```lean\n{code}\n```")
}

/// A generator that answers every task with a well-formed response.
fn cooperative() -> ScriptedGenerator {
    let gen = ScriptedGenerator::new();
    gen.fallback_fn(GenerationTask::TableDependencies, |p: &Prompt, _| {
        Ok(match p.unit.as_str() {
            "orders" => r#"```json
["users", "products"]
```"#
                .to_string(),
            _ => "[]".to_string(),
        })
    });
    gen.fallback_fn(GenerationTask::ApiDependencies, |p: &Prompt, _| {
        Ok(match p.unit.as_str() {
            "PlaceOrder" => r#"{"tables": ["orders"], "apis": ["CreateUser"]}"#.to_string(),
            _ => r#"{"tables": ["users"], "apis": []}"#.to_string(),
        })
    });
    gen.fallback_fn(GenerationTask::TableFormalization, |p: &Prompt, _| {
        Ok(lean(&format!("structure {} where\n  id : Nat", p.unit)))
    });
    gen.fallback_fn(GenerationTask::ApiFormalization, |p: &Prompt, _| {
        Ok(lean(&format!("def {} (id : Nat) : Nat := id", p.unit)))
    });
    gen.fallback(GenerationTask::ApiRequirements, r#"["returns the created id"]"#);
    gen.fallback(
        GenerationTask::TableProperties,
        r#"["ids are unique", "  ", "ids are stable"]"#,
    );
    for task in [GenerationTask::ApiTheorem, GenerationTask::TableTheorem] {
        gen.fallback_fn(task, |p: &Prompt, _| {
            let name = between(&p.instructions, "named `", "`");
            Ok(lean(&format!("theorem {name} : True := by\n  sorry")))
        });
    }
    gen.fallback_fn(GenerationTask::Proof, |p: &Prompt, _| {
        let statement = between(&p.body, "# Theorem\n```lean\n", "\n```");
        Ok(lean(&statement.replace("sorry", "trivial")))
    });
    gen
}

fn pipeline(
    gen: Arc<ScriptedGenerator>,
    tree: &tempfile::TempDir,
    store: Arc<dyn CheckpointStore>,
) -> Pipeline {
    Pipeline::new(gen, Arc::new(ScriptedToolchain::new()), tree.path(), store)
}

#[tokio::test]
async fn cooperative_run_completes_every_stage() {
    let tree = tempfile::tempdir().unwrap();
    let gen = Arc::new(cooperative());
    let store = Arc::new(MemoryCheckpointStore::new());
    let outcome = pipeline(gen, &tree, store)
        .run(shop(), RunOptions::default())
        .await
        .unwrap();

    assert!(outcome.is_completed());
    let project = outcome.project();
    assert_eq!(project.cursor.last_completed, Some(Stage::Proofs));
    assert_eq!(
        project.unit(&UnitRef::table("orders")).unwrap().dependencies,
        vec![UnitRef::table("users"), UnitRef::table("products")]
    );
    // Blank claims are dropped.
    assert_eq!(project.tables[0].requirements.len(), 2);
    for unit in project.all_units() {
        assert_eq!(unit.stage_status(Stage::Proofs), UnitStatus::Succeeded);
        assert!(unit.proofs().count() >= 1, "{} has no proofs", unit.name);
    }
    assert!(tree.path().join("Shop/Structures/orders.lean").exists());
    assert!(tree
        .path()
        .join("Shop/Theorems/users/users_prop1_proof.lean")
        .exists());
}

#[tokio::test]
async fn interrupted_and_resumed_run_matches_uninterrupted_run() {
    let straight_tree = tempfile::tempdir().unwrap();
    let straight = pipeline(
        Arc::new(cooperative()),
        &straight_tree,
        Arc::new(MemoryCheckpointStore::new()),
    )
    .run(shop(), RunOptions::default())
    .await
    .unwrap();

    let tree = tempfile::tempdir().unwrap();
    let checkpoints = tempfile::tempdir().unwrap();
    let store: Arc<dyn CheckpointStore> =
        Arc::new(FsCheckpointStore::new(checkpoints.path()).unwrap());

    let first = pipeline(Arc::new(cooperative()), &tree, Arc::clone(&store))
        .run(
            shop(),
            RunOptions {
                end: Some(Stage::ApiFormalization),
                ..RunOptions::default()
            },
        )
        .await
        .unwrap();
    assert!(first.is_completed());
    assert_eq!(
        first.project().cursor.last_completed,
        Some(Stage::ApiFormalization)
    );

    // A fresh process: new generator, new pipeline, same store.
    let gen = Arc::new(cooperative());
    let resumed = pipeline(gen.clone(), &tree, store)
        .run(
            shop(),
            RunOptions {
                resume: true,
                ..RunOptions::default()
            },
        )
        .await
        .unwrap();

    assert!(resumed.is_completed());
    assert_eq!(resumed.project(), straight.project());
    // Nothing before the resume point was regenerated.
    assert!(gen
        .calls()
        .iter()
        .all(|c| c.task != GenerationTask::TableFormalization
            && c.task != GenerationTask::ApiFormalization));
}

#[tokio::test]
async fn resumed_halt_retries_only_failed_units() {
    let tree = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryCheckpointStore::new());
    let gen = Arc::new(cooperative());
    gen.script(
        GenerationTask::ApiRequirements,
        "PlaceOrder",
        vec![Err(GeneratorError::Rejected("content policy".to_string()))],
    );

    let first = pipeline(gen.clone(), &tree, store.clone())
        .run(shop(), RunOptions::default())
        .await
        .unwrap();
    match &first {
        RunOutcome::Halted {
            stage, failures, ..
        } => {
            assert_eq!(*stage, Stage::ApiRequirements);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].unit, UnitRef::api("PlaceOrder"));
            assert_eq!(failures[0].reason, FailureReason::GeneratorRejected);
        }
        other => panic!("expected a halted run, got {}", other.label()),
    }
    assert!(gen.calls_for(GenerationTask::ApiTheorem, "CreateUser").is_empty());

    let resumed = pipeline(gen.clone(), &tree, store)
        .run(
            shop(),
            RunOptions {
                resume: true,
                ..RunOptions::default()
            },
        )
        .await
        .unwrap();

    assert!(resumed.is_completed());
    assert_eq!(resumed.project().cursor.halted, None);
    assert_eq!(
        gen.calls_for(GenerationTask::ApiRequirements, "CreateUser").len(),
        1
    );
    assert_eq!(
        gen.calls_for(GenerationTask::ApiRequirements, "PlaceOrder").len(),
        2
    );
}

#[tokio::test]
async fn older_checkpoint_schema_is_refused() {
    let tree = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryCheckpointStore::new());
    let payload = serde_json::to_value(shop()).unwrap();
    store.insert_raw(
        CheckpointEnvelope::seal(CHECKPOINT_SCHEMA_VERSION - 1, "Shop", None, payload).unwrap(),
    );

    let gen = Arc::new(cooperative());
    let err = pipeline(gen.clone(), &tree, store)
        .run(
            shop(),
            RunOptions {
                resume: true,
                ..RunOptions::default()
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ProoflineError::Pipeline(PipelineError::IncompatibleCheckpoint { found: 0, .. })
    ));
    assert_eq!(gen.call_count(), 0);
}

#[tokio::test]
async fn explicit_start_with_force_reruns_a_finished_stage() {
    let tree = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryCheckpointStore::new());
    let gen = Arc::new(cooperative());
    pipeline(gen.clone(), &tree, store.clone())
        .run(shop(), RunOptions::default())
        .await
        .unwrap();
    let before = gen.calls_for(GenerationTask::TableFormalization, "users").len();

    // Everything is done: a plain resume has nothing to run.
    let idle = pipeline(gen.clone(), &tree, store.clone())
        .run(
            shop(),
            RunOptions {
                resume: true,
                ..RunOptions::default()
            },
        )
        .await
        .unwrap();
    assert!(idle.is_completed());
    assert_eq!(
        gen.calls_for(GenerationTask::TableFormalization, "users").len(),
        before
    );

    let rerun = pipeline(gen.clone(), &tree, store)
        .run(
            shop(),
            RunOptions {
                resume: true,
                start: Some(Stage::TableFormalization),
                end: Some(Stage::TableFormalization),
                force: true,
            },
        )
        .await
        .unwrap();
    assert!(rerun.is_completed());
    assert_eq!(
        gen.calls_for(GenerationTask::TableFormalization, "users").len(),
        before + 1
    );
}

#[tokio::test]
async fn start_after_end_is_rejected() {
    let tree = tempfile::tempdir().unwrap();
    let err = pipeline(
        Arc::new(cooperative()),
        &tree,
        Arc::new(MemoryCheckpointStore::new()),
    )
    .run(
        shop(),
        RunOptions {
            start: Some(Stage::Proofs),
            end: Some(Stage::ApiDependency),
            ..RunOptions::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        ProoflineError::Pipeline(PipelineError::InvalidStageRange { .. })
    ));
}

#[tokio::test]
async fn stop_before_first_stage_checkpoints_and_reports_resume_point() {
    let tree = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryCheckpointStore::new());
    let gen = Arc::new(cooperative());
    let pipeline = pipeline(gen.clone(), &tree, store.clone());
    pipeline.stop_handle().stop();

    let outcome = pipeline.run(shop(), RunOptions::default()).await.unwrap();
    match outcome {
        RunOutcome::Stopped { next_stage, .. } => assert_eq!(next_stage, Stage::TableDependency),
        other => panic!("expected a stopped run, got {}", other.label()),
    }
    assert_eq!(gen.call_count(), 0);
    assert_eq!(store.save_count(), 1);
}

#[tokio::test]
async fn checkpoints_follow_every_rank_and_stage() {
    let tree = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryCheckpointStore::new());
    let outcome = pipeline(Arc::new(cooperative()), &tree, store.clone())
        .run(
            shop(),
            RunOptions {
                end: Some(Stage::TableFormalization),
                ..RunOptions::default()
            },
        )
        .await
        .unwrap();
    assert!(outcome.is_completed());

    // TABLE_DEPENDENCY: one flat rank + stage end.
    // TABLE_FORMALIZATION: {users, products}, {orders} + stage end.
    assert_eq!(store.save_count(), 5);

    let saved = store.load("Shop").await.unwrap().unwrap();
    assert_eq!(saved.schema_version, CHECKPOINT_SCHEMA_VERSION);
    assert_eq!(saved.stage_cursor.as_deref(), Some("TABLE_FORMALIZATION"));
}
