//! Rank assignment and rank-ordered dispatch.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use proofline_core::graph::{DependencyGraph, GraphWarning};
use proofline_core::scheduler::{RankPlan, Scheduler, StopHandle, UnitCommit};
use proofline_core::{
    FailureReason, Project, RunConfig, Stage, UnitFailure, UnitKind, UnitRef, UnitStatus, WorkUnit,
};

fn shop() -> Project {
    let mut p = Project::new("Shop", RunConfig::default());
    for name in ["users", "orders", "products"] {
        p.tables.push(WorkUnit::new(UnitKind::Table, name, ""));
    }
    p.tables[1].dependencies.push(UnitRef::table("users"));
    p.tables[1].dependencies.push(UnitRef::table("products"));

    let mut create = WorkUnit::new(UnitKind::Api, "CreateUser", "POST /users");
    create.dependencies.push(UnitRef::table("users"));
    p.apis.push(create);
    p
}

#[test]
fn create_user_ranks_after_users() {
    let (graph, warnings) = DependencyGraph::from_project(&shop());
    assert!(warnings.is_empty());

    let ranks = graph.ranks();
    assert_eq!(ranks[&UnitRef::table("users")], 0);
    assert_eq!(ranks[&UnitRef::api("CreateUser")], 1);

    for (unit, rank) in &ranks {
        for dep in graph.dependencies(unit) {
            assert!(ranks[dep] < *rank, "{unit} must rank above {dep}");
        }
    }
}

#[test]
fn cycle_breaking_ignores_input_order() {
    let t = UnitRef::table;
    let edges = vec![
        (t("a"), vec![t("c")]),
        (t("b"), vec![t("a")]),
        (t("c"), vec![t("b")]),
        (t("d"), vec![t("a"), t("ghost")]),
    ];
    let mut reversed = edges.clone();
    reversed.reverse();

    let (g1, w1) = DependencyGraph::build(edges);
    let (g2, w2) = DependencyGraph::build(reversed);
    assert_eq!(g1, g2);
    assert_eq!(w1, w2);
    assert!(w1.iter().any(|w| matches!(w, GraphWarning::CycleBroken { .. })));
    assert!(w1.iter().any(|w| matches!(w, GraphWarning::DanglingDependency { .. })));

    // The result is acyclic: every unit got a rank.
    assert_eq!(g1.ranks().len(), 4);
}

#[tokio::test]
async fn units_run_rank_by_rank() {
    let mut project = shop();
    let (graph, _) = DependencyGraph::from_project(&project);
    let plan = RankPlan::new(graph, &[UnitKind::Table, UnitKind::Api]);

    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let task_log = Arc::clone(&log);
    let task = move |_snapshot: Arc<Project>, unit: WorkUnit| {
        let log = Arc::clone(&task_log);
        async move {
            log.lock().unwrap().push(format!("start {}", unit.name));
            tokio::time::sleep(Duration::from_millis(5)).await;
            log.lock().unwrap().push(format!("end {}", unit.name));
            UnitCommit::succeeded(unit, 1)
        }
    };

    let run = Scheduler::new(4)
        .run_ranked(&mut project, Stage::Proofs, plan, false, task, &(), &StopHandle::new())
        .await
        .unwrap();
    assert_eq!(run.failed, Vec::<UnitRef>::new());
    assert_eq!(run.succeeded.len(), 4);

    let log = log.lock().unwrap().clone();
    let pos = |entry: &str| log.iter().position(|e| e == entry).unwrap();
    assert!(pos("end users") < pos("start CreateUser"));
    assert!(pos("end products") < pos("start orders"));
    assert_eq!(
        project.tables[0].stage_status(Stage::Proofs),
        UnitStatus::Succeeded
    );
}

#[tokio::test]
async fn dependents_of_failed_units_are_not_run() {
    let mut project = shop();
    let (graph, _) = DependencyGraph::from_project(&project);
    let plan = RankPlan::new(graph, &[UnitKind::Table, UnitKind::Api]);

    let ran: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let task_ran = Arc::clone(&ran);
    let task = move |_snapshot: Arc<Project>, unit: WorkUnit| {
        let ran = Arc::clone(&task_ran);
        async move {
            ran.lock().unwrap().push(unit.name.clone());
            if unit.name == "users" {
                let failure = UnitFailure::new(FailureReason::BudgetExhausted, "never compiled");
                UnitCommit::failed(unit, 3, failure)
            } else {
                UnitCommit::succeeded(unit, 1)
            }
        }
    };

    let run = Scheduler::new(2)
        .run_ranked(&mut project, Stage::Proofs, plan, false, task, &(), &StopHandle::new())
        .await
        .unwrap();

    let ran = ran.lock().unwrap().clone();
    assert!(!ran.contains(&"CreateUser".to_string()));
    assert!(!ran.contains(&"orders".to_string()));
    assert!(ran.contains(&"products".to_string()));

    let reasons: BTreeMap<String, FailureReason> = run
        .failed
        .iter()
        .map(|u| {
            let record = &project.unit(u).unwrap().stages[&Stage::Proofs];
            (u.name.clone(), record.failure.clone().unwrap().reason)
        })
        .collect();
    assert_eq!(reasons["users"], FailureReason::BudgetExhausted);
    assert_eq!(reasons["orders"], FailureReason::DependencyFailed);
    assert_eq!(reasons["CreateUser"], FailureReason::DependencyFailed);
}
