//! Compile-diagnose-repair loop behavior against scripted collaborators.

use std::sync::Arc;

use proofline_core::fakes::{ScriptedGenerator, ScriptedToolchain};
use proofline_core::repair::{CandidateRule, RepairOutcome, RepairRequest};
use proofline_core::{
    Artifact, ArtifactKind, ArtifactStatus, DiagnosticsParser, FailureReason, GenerationTask,
    GeneratorError, LeanRenderer, Materializer, Project, Prompt, RepairLoop, RunConfig, UnitKind,
    UnitRef, WorkUnit,
};

const BROKEN: &str = "```lean\ndef createUser (u : User) : User := broken\n```";
const FIXED: &str = "```lean\ndef createUser (u : User) : User := u\n```";
const LINE_12: &str = "{file}:12:4: error: unknown identifier 'broken'";

fn project() -> Project {
    let mut p = Project::new("Shop", RunConfig::default());
    let mut users = WorkUnit::new(UnitKind::Table, "users", "id, email");
    let mut structure = Artifact::new("users", ArtifactKind::Structure);
    structure.source = "structure User where\n  id : Nat".to_string();
    structure.status = ArtifactStatus::Succeeded;
    users.upsert_artifact(structure);
    p.tables.push(users);

    let mut create = WorkUnit::new(UnitKind::Api, "CreateUser", "POST /users");
    create.dependencies.push(UnitRef::table("users"));
    p.apis.push(create);
    p
}

fn request() -> RepairRequest {
    RepairRequest::new(
        "CreateUser",
        ArtifactKind::Function,
        Prompt::new(GenerationTask::ApiFormalization, "CreateUser", "formalize", "POST /users"),
        42,
    )
}

struct Harness {
    dir: tempfile::TempDir,
    gen: Arc<ScriptedGenerator>,
    toolchain: Arc<ScriptedToolchain>,
    repair: RepairLoop,
}

fn harness(toolchain: ScriptedToolchain) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let gen = Arc::new(ScriptedGenerator::new());
    let toolchain = Arc::new(toolchain);
    let repair = RepairLoop::new(
        gen.clone(),
        toolchain.clone(),
        Arc::new(LeanRenderer),
        Materializer::new(dir.path()),
        DiagnosticsParser::default(),
    );
    Harness {
        dir,
        gen,
        toolchain,
        repair,
    }
}

#[tokio::test]
async fn located_diagnostic_is_fed_back_verbatim() {
    let h = harness(ScriptedToolchain::new().fail_on("broken", LINE_12));
    h.gen.script(
        GenerationTask::ApiFormalization,
        "CreateUser",
        vec![Ok(BROKEN.to_string()), Ok(FIXED.to_string())],
    );
    let p = project();
    let mut unit = p.apis[0].clone();

    let report = h.repair.repair(&p, &mut unit, &request(), 5).await;

    assert_eq!(report.outcome, RepairOutcome::Succeeded);
    assert_eq!(report.attempts_used(), 2);
    assert_eq!(report.artifact.status, ArtifactStatus::Succeeded);
    assert!(report.artifact.diagnostics.is_empty());
    assert_eq!(unit.artifact("CreateUser"), Some(&report.artifact));

    let calls = h.gen.calls();
    assert!(calls[0].feedback.is_empty());
    assert_eq!(
        calls[1].feedback,
        vec!["Shop/Functions/CreateUser.lean:12:4: error: unknown identifier 'broken'".to_string()]
    );
    assert!(calls[1].prior.iter().any(|p| p.contains(":= broken")));

    let on_disk =
        std::fs::read_to_string(h.dir.path().join("Shop/Functions/CreateUser.lean")).unwrap();
    assert!(on_disk.starts_with("import Shop.Structures.users\n"));
    assert!(on_disk.contains(":= u"));
}

#[tokio::test]
async fn budget_decreases_by_one_per_failed_attempt() {
    let h = harness(ScriptedToolchain::new().fail_on("broken", LINE_12));
    h.gen.fallback(GenerationTask::ApiFormalization, BROKEN);
    let p = project();
    let mut unit = p.apis[0].clone();

    let report = h.repair.repair(&p, &mut unit, &request(), 4).await;

    assert_eq!(report.outcome, RepairOutcome::Exhausted);
    let remaining: Vec<u32> = report.attempts.iter().map(|a| a.remaining_budget).collect();
    assert_eq!(remaining, vec![3, 2, 1, 0]);
    assert_eq!(h.toolchain.check_count(), 4);

    // Last diagnostics stay on the failed artifact.
    assert_eq!(report.artifact.status, ArtifactStatus::Failed);
    assert_eq!(report.artifact.diagnostics.len(), 1);
    assert_eq!(report.artifact.diagnostics[0].location.as_ref().unwrap().line, 12);

    let failure = report.failure().unwrap();
    assert_eq!(failure.reason, FailureReason::BudgetExhausted);
    assert_eq!(failure.diagnostics, report.artifact.diagnostics);
}

#[tokio::test]
async fn succeeded_artifact_is_not_regenerated() {
    let h = harness(ScriptedToolchain::new());
    h.gen.fallback(GenerationTask::ApiFormalization, FIXED);
    let p = project();
    let mut unit = p.apis[0].clone();

    let first = h.repair.repair(&p, &mut unit, &request(), 3).await;
    assert!(first.succeeded());
    let calls = h.gen.call_count();
    let checks = h.toolchain.check_count();

    let again = h.repair.repair(&p, &mut unit, &request(), 3).await;
    assert_eq!(again.outcome, RepairOutcome::AlreadySucceeded);
    assert_eq!(again.artifact, first.artifact);
    assert_eq!(h.gen.call_count(), calls);
    assert_eq!(h.toolchain.check_count(), checks);

    let forced = h.repair.repair(&p, &mut unit, &request().forced(true), 3).await;
    assert_eq!(forced.outcome, RepairOutcome::Succeeded);
    assert_eq!(h.gen.call_count(), calls + 1);
}

#[tokio::test]
async fn rejection_stops_the_loop() {
    let h = harness(ScriptedToolchain::new());
    h.gen.script(
        GenerationTask::ApiFormalization,
        "CreateUser",
        vec![Err(GeneratorError::Rejected("content policy".to_string()))],
    );
    let p = project();
    let mut unit = p.apis[0].clone();

    let report = h.repair.repair(&p, &mut unit, &request(), 5).await;
    assert!(matches!(report.outcome, RepairOutcome::Rejected { .. }));
    assert_eq!(report.attempts_used(), 1);
    assert_eq!(report.failure().unwrap().reason, FailureReason::GeneratorRejected);
    assert_eq!(h.toolchain.check_count(), 0);
}

#[tokio::test]
async fn unavailable_generator_consumes_an_attempt() {
    let h = harness(ScriptedToolchain::new());
    h.gen.script(
        GenerationTask::ApiFormalization,
        "CreateUser",
        vec![
            Err(GeneratorError::Unavailable("timeout".to_string())),
            Ok(FIXED.to_string()),
        ],
    );
    let p = project();
    let mut unit = p.apis[0].clone();

    let report = h.repair.repair(&p, &mut unit, &request(), 3).await;
    assert!(report.succeeded());
    assert_eq!(report.attempts_used(), 2);
    assert!(report.attempts[0].outage);
    assert!(report.attempts[0].diagnostics[0].message.contains("timeout"));
    // An outage says nothing about the candidate, so it is not fed back.
    assert!(h.gen.calls()[1].feedback.is_empty());
}

#[tokio::test]
async fn toolchain_outage_consumes_an_attempt_without_feedback() {
    let h = harness(ScriptedToolchain::new().time_out_first(1));
    h.gen.fallback(GenerationTask::ApiFormalization, FIXED);
    let p = project();
    let mut unit = p.apis[0].clone();

    let report = h.repair.repair(&p, &mut unit, &request(), 3).await;
    assert!(report.succeeded());
    assert_eq!(report.attempts_used(), 2);
    assert_eq!(report.attempts[0].remaining_budget, 2);
    assert!(report.attempts[0].diagnostics[0].message.contains("timed out"));
    assert!(h.gen.calls()[1].feedback.is_empty());
    assert_eq!(h.toolchain.check_count(), 2);
}

#[tokio::test]
async fn outage_keeps_the_last_checker_feedback() {
    let h = harness(ScriptedToolchain::new().fail_on("broken", LINE_12));
    h.gen.script(
        GenerationTask::ApiFormalization,
        "CreateUser",
        vec![
            Ok(BROKEN.to_string()),
            Err(GeneratorError::Unavailable("503".to_string())),
            Ok(FIXED.to_string()),
        ],
    );
    let p = project();
    let mut unit = p.apis[0].clone();

    let report = h.repair.repair(&p, &mut unit, &request(), 3).await;
    assert!(report.succeeded());
    let calls = h.gen.calls();
    assert_eq!(calls[1].feedback, calls[2].feedback);
    assert!(calls[2].feedback[0].contains("unknown identifier 'broken'"));
}

#[tokio::test]
async fn budget_spent_on_outages_is_exhausted_and_reported() {
    let h = harness(ScriptedToolchain::new().time_out_first(2));
    h.gen.fallback(GenerationTask::ApiFormalization, FIXED);
    let p = project();
    let mut unit = p.apis[0].clone();

    let report = h.repair.repair(&p, &mut unit, &request(), 2).await;
    assert_eq!(report.outcome, RepairOutcome::Exhausted);
    assert!(report.ended_in_outage());
    let failure = report.failure().unwrap();
    assert_eq!(failure.reason, FailureReason::BudgetExhausted);
    assert!(failure.diagnostics[0].message.contains("toolchain error"));
}

#[tokio::test]
async fn rule_violations_skip_the_toolchain() {
    let h = harness(ScriptedToolchain::new());
    h.gen.script(
        GenerationTask::ApiFormalization,
        "CreateUser",
        vec![
            Ok("```lean\ndef createUser (u : User) : User := sorry\n```".to_string()),
            Ok(FIXED.to_string()),
        ],
    );
    let p = project();
    let mut unit = p.apis[0].clone();
    let req = request().with_rule(CandidateRule::ForbidToken("sorry".to_string()));

    let report = h.repair.repair(&p, &mut unit, &req, 3).await;
    assert!(report.succeeded());
    assert_eq!(report.attempts_used(), 2);
    assert_eq!(h.toolchain.check_count(), 1);
    assert!(report.attempts[0].diagnostics[0].message.contains("sorry"));
}
