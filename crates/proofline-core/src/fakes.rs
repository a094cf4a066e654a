//! Deterministic fakes for the generator and toolchain (testing only).
//!
//! `ScriptedGenerator` replays responses keyed by `(task, unit)` and records
//! every call; `ScriptedToolchain` inspects the materialized file and fails
//! when it contains a configured token.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::domain::error::{GeneratorError, ToolchainError};
use crate::generator::{ContentGenerator, GenerationContext, GenerationTask, Prompt};
use crate::toolchain::{CheckOutcome, Toolchain};

type Responder =
    dyn Fn(&Prompt, &GenerationContext) -> Result<String, GeneratorError> + Send + Sync;

/// Generator backed by a closure.
pub struct FnGenerator {
    f: Box<Responder>,
}

impl FnGenerator {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Prompt, &GenerationContext) -> Result<String, GeneratorError>
            + Send
            + Sync
            + 'static,
    {
        Self { f: Box::new(f) }
    }
}

#[async_trait]
impl ContentGenerator for FnGenerator {
    async fn generate(
        &self,
        prompt: &Prompt,
        context: &GenerationContext,
    ) -> Result<String, GeneratorError> {
        (self.f)(prompt, context)
    }
}

/// One call seen by a [`ScriptedGenerator`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub task: GenerationTask,
    pub unit: String,
    pub attempt: u32,
    pub seed: u64,
    /// Rendered feedback diagnostics, as sent.
    pub feedback: Vec<String>,
    pub prior: Vec<String>,
}

/// Replays scripted responses.
///
/// Lookup order: the `(task, unit)` queue, then the task's fallback, then a
/// `Rejected` error naming the missing script.
#[derive(Default)]
pub struct ScriptedGenerator {
    queues: Mutex<HashMap<(GenerationTask, String), VecDeque<Result<String, GeneratorError>>>>,
    fallbacks: Mutex<BTreeMap<GenerationTask, Arc<Responder>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue responses for `(task, unit)`, consumed in order.
    pub fn script(
        &self,
        task: GenerationTask,
        unit: &str,
        responses: Vec<Result<String, GeneratorError>>,
    ) {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues
            .entry((task, unit.to_string()))
            .or_default()
            .extend(responses);
    }

    /// Respond to every unscripted `task` call with `response`.
    pub fn fallback(&self, task: GenerationTask, response: &str) {
        let response = response.to_string();
        self.fallback_fn(task, move |_, _| Ok(response.clone()));
    }

    /// Respond to every unscripted `task` call with `f`.
    pub fn fallback_fn<F>(&self, task: GenerationTask, f: F)
    where
        F: Fn(&Prompt, &GenerationContext) -> Result<String, GeneratorError>
            + Send
            + Sync
            + 'static,
    {
        let mut fallbacks = self.fallbacks.lock().unwrap_or_else(PoisonError::into_inner);
        fallbacks.insert(task, Arc::new(f));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Calls made for `(task, unit)`.
    pub fn calls_for(&self, task: GenerationTask, unit: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.task == task && c.unit == unit)
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl ContentGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        prompt: &Prompt,
        context: &GenerationContext,
    ) -> Result<String, GeneratorError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall {
                task: prompt.task,
                unit: prompt.unit.clone(),
                attempt: context.attempt,
                seed: context.seed,
                feedback: context.feedback.iter().map(|d| d.render()).collect(),
                prior: context.prior.clone(),
            });

        let scripted = {
            let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
            queues
                .get_mut(&(prompt.task, prompt.unit.clone()))
                .and_then(VecDeque::pop_front)
        };
        if let Some(response) = scripted {
            return response;
        }

        let fallback = self
            .fallbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&prompt.task)
            .cloned();
        match fallback {
            Some(f) => f(prompt, context),
            None => Err(GeneratorError::Rejected(format!(
                "no scripted response for {} of {}",
                prompt.task, prompt.unit
            ))),
        }
    }
}

/// Toolchain that reads the materialized target and fails on tokens.
#[derive(Default)]
pub struct ScriptedToolchain {
    failures: Mutex<Vec<(String, String)>>,
    checked: Mutex<Vec<PathBuf>>,
    checks: AtomicUsize,
    timeouts: AtomicUsize,
}

impl ScriptedToolchain {
    /// Passes every check until a failure token is configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any file containing `token`, reporting `output`. `{file}` in
    /// `output` is replaced with the checked path.
    pub fn fail_on(self, token: &str, output: &str) -> Self {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((token.to_string(), output.to_string()));
        self
    }

    /// Time out the next `n` checks before looking at any file.
    pub fn time_out_first(self, n: usize) -> Self {
        self.timeouts.store(n, Ordering::SeqCst);
        self
    }

    pub fn check_count(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn checked_files(&self) -> Vec<PathBuf> {
        self.checked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Toolchain for ScriptedToolchain {
    async fn check(&self, tree: &Path, target: &Path) -> Result<CheckOutcome, ToolchainError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.checked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(target.to_path_buf());

        let timed_out = self
            .timeouts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if timed_out {
            return Err(ToolchainError::Timeout { secs: 1 });
        }

        let content = tokio::fs::read_to_string(tree.join(target)).await?;
        let failures = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for (token, output) in failures {
            if content.contains(&token) {
                let file = target.to_string_lossy();
                return Ok(CheckOutcome::failed(output.replace("{file}", &file)));
            }
        }
        Ok(CheckOutcome::passed(""))
    }
}
