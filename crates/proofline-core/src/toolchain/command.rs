use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::domain::error::ToolchainError;
use crate::metrics::METRICS;
use crate::toolchain::{CheckOutcome, Toolchain};

const TARGET_PLACEHOLDER: &str = "{target}";

/// Runs a checker command in the project tree root.
///
/// The target path replaces any `{target}` argument, or is appended when no
/// argument mentions it. Default: `lake env lean <target>`.
#[derive(Debug, Clone)]
pub struct CommandToolchain {
    command: Vec<String>,
    timeout: Duration,
}

impl Default for CommandToolchain {
    fn default() -> Self {
        Self {
            command: vec!["lake".to_string(), "env".to_string(), "lean".to_string()],
            timeout: Duration::from_secs(300),
        }
    }
}

impl CommandToolchain {
    pub fn new(command: Vec<String>, timeout: Duration) -> Result<Self, ToolchainError> {
        if command.is_empty() {
            return Err(ToolchainError::EmptyCommand);
        }
        Ok(Self { command, timeout })
    }

    /// Split a shell-like command line on whitespace.
    pub fn parse(command_line: &str, timeout: Duration) -> Result<Self, ToolchainError> {
        Self::new(
            command_line.split_whitespace().map(str::to_string).collect(),
            timeout,
        )
    }

    fn argv(&self, target: &Path) -> Vec<String> {
        let target = target.to_string_lossy();
        let mut argv: Vec<String> = self
            .command
            .iter()
            .map(|arg| arg.replace(TARGET_PLACEHOLDER, &target))
            .collect();
        if !self.command.iter().any(|a| a.contains(TARGET_PLACEHOLDER)) {
            argv.push(target.into_owned());
        }
        argv
    }
}

#[async_trait]
impl Toolchain for CommandToolchain {
    async fn check(&self, tree: &Path, target: &Path) -> Result<CheckOutcome, ToolchainError> {
        let argv = self.argv(target);
        let (exe, args) = argv.split_first().ok_or(ToolchainError::EmptyCommand)?;
        let start = Instant::now();
        METRICS.inc_toolchain_checks();

        let child = Command::new(exe)
            .args(args)
            .current_dir(tree)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ToolchainError::Spawn {
                command: argv.join(" "),
                source,
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ToolchainError::Timeout {
                secs: self.timeout.as_secs(),
            })??;

        let mut raw_output = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !raw_output.is_empty() && !raw_output.ends_with('\n') {
                raw_output.push('\n');
            }
            raw_output.push_str(&stderr);
        }

        debug!(
            file = %target.display(),
            ok = output.status.success(),
            duration_ms = start.elapsed().as_millis() as u64,
            "toolchain check finished"
        );

        Ok(CheckOutcome {
            ok: output.status.success(),
            raw_output,
        })
    }
}
