//! Proofline CLI
//!
//! The `proofline` command drives a project manifest through the
//! formalization pipeline and inspects stored checkpoints.
//!
//! ## Commands
//!
//! - `run`: Run (or resume) the stage pipeline for a project
//! - `status`: Show the stage cursor and unit counts of a checkpoint
//!
//! Exit codes: `0` completed, `1` halted or stopped, `2` setup error.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use proofline_core::{
    BackendRouter, BackendRouterConfig, Checkpointer, CommandToolchain, Pipeline, Project,
    ProjectManifest, RetryingGenerator, RunConfig, RunOptions, RunOutcome, Stage, UnitStatus,
};
use proofline_state::FsCheckpointStore;
use serde_json::json;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "proofline")]
#[command(author = "Stevedores Org")]
#[command(version = proofline_core::VERSION)]
#[command(about = "Documentation-driven formalization pipeline", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline for a project manifest
    Run(RunArgs),

    /// Show the checkpointed progress of a project
    Status {
        /// Project name the checkpoint is stored under
        #[arg(long)]
        project_name: String,

        /// Checkpoint root directory
        #[arg(long, env = "PROOFLINE_OUTPUT_BASE_PATH", default_value = ".proofline")]
        output_base_path: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Project manifest (JSON) produced by the project parser
    #[arg(long)]
    project: PathBuf,

    /// Checkpoint root directory
    #[arg(long, env = "PROOFLINE_OUTPUT_BASE_PATH", default_value = ".proofline")]
    output_base_path: PathBuf,

    /// Root of the Lean project tree artifacts are written into
    #[arg(long, env = "PROOFLINE_LEAN_BASE_PATH", default_value = "lean")]
    lean_base_path: PathBuf,

    /// Generator backend configuration (TOML)
    #[arg(long, env = "PROOFLINE_BACKENDS")]
    backends: PathBuf,

    /// Model served by the configured backends
    #[arg(long, default_value = "deepseek-chat")]
    model: String,

    /// Checker command; the target file replaces `{target}` or is appended
    #[arg(long, default_value = "lake env lean")]
    toolchain_cmd: String,

    /// First stage to run (overrides the checkpoint's resume point)
    #[arg(long, value_parser = parse_stage)]
    start_state: Option<Stage>,

    /// Last stage to run
    #[arg(long, value_parser = parse_stage)]
    end_state: Option<Stage>,

    /// Resume from the stored checkpoint
    #[arg(long = "continue")]
    resume: bool,

    /// Re-run units that already succeeded
    #[arg(long)]
    force: bool,

    #[arg(long)]
    random_seed: Option<u64>,

    #[arg(long)]
    max_workers: Option<usize>,

    #[arg(long)]
    max_theorem_retries: Option<u32>,

    #[arg(long)]
    max_global_attempts: Option<u32>,

    /// Negative theorems attempted per proved theorem
    #[arg(long)]
    max_examples: Option<u32>,

    #[arg(long)]
    max_formalization_retries: Option<u32>,

    /// Log prompts and responses at trace level
    #[arg(long)]
    log_model_io: bool,
}

const EXIT_OK: u8 = 0;
/// Halted or stopped; rerun with `--continue`.
const EXIT_UNFINISHED: u8 = 1;
const EXIT_SETUP: u8 = 2;

fn parse_stage(s: &str) -> std::result::Result<Stage, String> {
    s.parse::<Stage>().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    proofline_core::telemetry::init_tracing(cli.json, level);

    let result = match cli.command {
        Commands::Run(args) => cmd_run(&args).await,
        Commands::Status {
            project_name,
            output_base_path,
        } => cmd_status(&project_name, &output_base_path, cli.json).await,
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_SETUP)
        }
    }
}

/// Flags layered over the default configuration.
fn run_config(args: &RunArgs) -> RunConfig {
    let mut config = RunConfig::default();
    if let Some(seed) = args.random_seed {
        config.random_seed = seed;
    }
    if let Some(workers) = args.max_workers {
        config.max_workers = workers;
    }
    if let Some(n) = args.max_theorem_retries {
        config.budget.max_theorem_retries = n;
    }
    if let Some(n) = args.max_global_attempts {
        config.budget.max_global_attempts = n;
    }
    if let Some(n) = args.max_examples {
        config.budget.max_examples = n;
    }
    if let Some(n) = args.max_formalization_retries {
        config.max_formalization_retries = n;
    }
    config.log_model_io = args.log_model_io;
    config
}

fn run_options(args: &RunArgs) -> RunOptions {
    RunOptions {
        start: args.start_state,
        end: args.end_state,
        resume: args.resume,
        force: args.force,
    }
}

async fn cmd_run(args: &RunArgs) -> Result<u8> {
    let config = run_config(args);
    config.validate().context("Invalid run configuration")?;

    let manifest = ProjectManifest::load(&args.project)
        .with_context(|| format!("Failed to load manifest {}", args.project.display()))?;
    let project = Project::from_manifest(&manifest, config.clone())?;

    let backends = BackendRouterConfig::load(&args.backends)
        .with_context(|| format!("Failed to load backends {}", args.backends.display()))?;
    let router = BackendRouter::from_config(&backends, &args.model)
        .with_context(|| format!("No usable backend for model {}", args.model))?;
    let generator = RetryingGenerator::from_config(Arc::new(router), &config);

    let toolchain = CommandToolchain::parse(
        &args.toolchain_cmd,
        Duration::from_secs(config.toolchain_timeout_secs),
    )
    .context("Invalid toolchain command")?;

    let store = FsCheckpointStore::new(&args.output_base_path).with_context(|| {
        format!(
            "Failed to open checkpoint store at {}",
            args.output_base_path.display()
        )
    })?;

    let pipeline = Pipeline::new(
        Arc::new(generator),
        Arc::new(toolchain),
        &args.lean_base_path,
        Arc::new(store),
    );

    let stop = pipeline.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current rank");
            stop.stop();
        }
    });

    info!(project = %project.name, "starting pipeline");
    let outcome = pipeline
        .run(project, run_options(args))
        .await
        .context("Pipeline run failed")?;

    print_outcome(&outcome);
    Ok(exit_code(&outcome))
}

fn exit_code(outcome: &RunOutcome) -> u8 {
    match outcome {
        RunOutcome::Completed { .. } => EXIT_OK,
        RunOutcome::Halted { .. } | RunOutcome::Stopped { .. } => EXIT_UNFINISHED,
    }
}

fn print_outcome(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Completed { project } => {
            println!("✓ {}: completed", project.name);
        }
        RunOutcome::Halted {
            stage, failures, ..
        } => {
            println!("✗ halted in {stage}: {} failing units", failures.len());
            for f in failures {
                println!("  - {} ({}): {}", f.unit, f.reason, f.detail);
                for d in &f.diagnostics {
                    println!("      {}", d.render());
                }
            }
            println!();
            println!("Fix the inputs and rerun with --continue to retry {stage}.");
        }
        RunOutcome::Stopped { next_stage, .. } => {
            println!("stopped; rerun with --continue to resume at {next_stage}");
        }
    }
}

async fn cmd_status(name: &str, output_base_path: &Path, json: bool) -> Result<u8> {
    let store = FsCheckpointStore::new(output_base_path).with_context(|| {
        format!(
            "Failed to open checkpoint store at {}",
            output_base_path.display()
        )
    })?;
    let checkpointer = Checkpointer::new(Arc::new(store));
    let Some(project) = checkpointer
        .load(name)
        .await
        .with_context(|| format!("Failed to load checkpoint for {name}"))?
    else {
        println!("No checkpoint for project {name}");
        return Ok(EXIT_UNFINISHED);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&status_json(&project))?);
    } else {
        for line in status_lines(&project) {
            println!("{line}");
        }
    }
    Ok(EXIT_OK)
}

/// `(succeeded, failed, pending)` over the units a stage covers.
fn stage_counts(project: &Project, stage: Stage) -> (usize, usize, usize) {
    let mut counts = (0, 0, 0);
    for kind in stage.unit_kinds() {
        for unit in project.units(*kind) {
            match unit.stage_status(stage) {
                UnitStatus::Succeeded => counts.0 += 1,
                UnitStatus::Failed => counts.1 += 1,
                UnitStatus::Pending | UnitStatus::InProgress => counts.2 += 1,
            }
        }
    }
    counts
}

fn status_lines(project: &Project) -> Vec<String> {
    let cursor = &project.cursor;
    let mut lines = vec![
        format!("Project: {}", project.name),
        format!(
            "Last completed: {}",
            cursor.last_completed.map(Stage::as_str).unwrap_or("none")
        ),
    ];
    if let Some(stage) = cursor.halted {
        lines.push(format!("Halted in: {stage}"));
    }
    lines.push(String::new());
    for stage in Stage::ALL {
        let (ok, failed, pending) = stage_counts(project, stage);
        lines.push(format!(
            "  {:<20} {ok:>3} succeeded  {failed:>3} failed  {pending:>3} pending",
            stage.as_str()
        ));
    }
    lines
}

fn status_json(project: &Project) -> serde_json::Value {
    let stages: serde_json::Map<String, serde_json::Value> = Stage::ALL
        .iter()
        .map(|stage| {
            let (ok, failed, pending) = stage_counts(project, *stage);
            (
                stage.as_str().to_string(),
                json!({ "succeeded": ok, "failed": failed, "pending": pending }),
            )
        })
        .collect();
    json!({
        "project": project.name,
        "cursor": project.cursor,
        "stages": stages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proofline_core::domain::unit::StageRecord;
    use proofline_core::{UnitKind, WorkUnit};
    use proofline_state::CheckpointStore;

    #[test]
    fn toolchain_help_names_the_target_placeholder() {
        use clap::CommandFactory;

        let cli = Cli::command();
        let run = cli.find_subcommand("run").unwrap();
        let arg = run
            .get_arguments()
            .find(|a| a.get_id() == "toolchain_cmd")
            .unwrap();
        let help = arg.get_help().unwrap().to_string();
        assert!(help.contains("{target}"));
        assert!(!help.contains("{file}"));
    }

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args.iter().copied()).unwrap()
    }

    #[test]
    fn run_flags_override_defaults() {
        let cli = parse(&[
            "proofline",
            "run",
            "--project",
            "shop.json",
            "--backends",
            "backends.toml",
            "--start-state",
            "api-formalization",
            "--continue",
            "--max-workers",
            "8",
            "--max-theorem-retries",
            "2",
            "--max-global-attempts",
            "3",
            "--max-examples",
            "1",
            "--random-seed",
            "7",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected the run command");
        };

        let config = run_config(&args);
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.random_seed, 7);
        assert_eq!(config.budget.max_theorem_retries, 2);
        assert_eq!(config.budget.max_global_attempts, 3);
        assert_eq!(config.budget.max_examples, 1);
        assert_eq!(
            config.max_formalization_retries,
            RunConfig::default().max_formalization_retries
        );

        let options = run_options(&args);
        assert_eq!(options.start, Some(Stage::ApiFormalization));
        assert!(options.resume);
        assert!(!options.force);
    }

    #[test]
    fn unknown_stage_is_a_usage_error() {
        let result = Cli::try_parse_from([
            "proofline",
            "run",
            "--project",
            "shop.json",
            "--backends",
            "b.toml",
            "--end-state",
            "LEMMAS",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn halted_and_stopped_exit_with_one() {
        let project = Project::new("Shop", RunConfig::default());
        let halted = RunOutcome::Halted {
            stage: Stage::Proofs,
            failures: Vec::new(),
            project: project.clone(),
        };
        let stopped = RunOutcome::Stopped {
            next_stage: Stage::Proofs,
            project: project.clone(),
        };
        assert_eq!(exit_code(&halted), EXIT_UNFINISHED);
        assert_eq!(exit_code(&stopped), EXIT_UNFINISHED);
        assert_eq!(exit_code(&RunOutcome::Completed { project }), EXIT_OK);
    }

    fn partially_run() -> Project {
        let mut project = Project::new("Shop", RunConfig::default());
        let mut users = WorkUnit::new(UnitKind::Table, "users", "");
        users.set_stage(Stage::TableDependency, StageRecord::succeeded(1));
        let mut orders = WorkUnit::new(UnitKind::Table, "orders", "");
        orders.set_stage(Stage::TableDependency, StageRecord::succeeded(1));
        project.tables = vec![users, orders];
        project.apis.push(WorkUnit::new(UnitKind::Api, "CreateUser", ""));
        project.cursor.last_completed = Some(Stage::TableDependency);
        project
    }

    #[test]
    fn status_counts_units_per_stage() {
        let project = partially_run();
        assert_eq!(stage_counts(&project, Stage::TableDependency), (2, 0, 0));
        assert_eq!(stage_counts(&project, Stage::Proofs), (0, 0, 3));

        let lines = status_lines(&project);
        assert_eq!(lines[1], "Last completed: TABLE_DEPENDENCY");
        assert!(lines.iter().any(|l| l.contains("TABLE_DEPENDENCY") && l.contains("2 succeeded")));

        let value = status_json(&project);
        assert_eq!(value["stages"]["API_DEPENDENCY"]["pending"], 1);
        assert_eq!(value["cursor"]["last_completed"], "TABLE_DEPENDENCY");
    }

    #[tokio::test]
    async fn status_reads_a_stored_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsCheckpointStore::new(dir.path()).unwrap());
        Checkpointer::new(store.clone())
            .save(&partially_run())
            .await
            .unwrap();
        assert!(store.contains("Shop").await.unwrap());

        let code = cmd_status("Shop", dir.path(), false).await.unwrap();
        assert_eq!(code, EXIT_OK);
        let missing = cmd_status("Other", dir.path(), true).await.unwrap();
        assert_eq!(missing, EXIT_UNFINISHED);
    }
}
