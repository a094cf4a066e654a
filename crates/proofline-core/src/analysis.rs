//! Structured analysis through the generator: dependencies and claims.
//!
//! Each request expects a JSON answer (preferably in a ```` ```json ````
//! block). Unparseable answers are retried with the parse error as
//! feedback, up to the configured budget.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::diagnostic::Diagnostic;
use crate::domain::error::{AnalysisError, GeneratorError};
use crate::domain::project::Project;
use crate::domain::unit::{UnitKind, UnitRef, WorkUnit};
use crate::generator::{
    extract_json_block, ContentGenerator, GenerationContext, GenerationTask, Prompt,
};

/// A parsed answer and the attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis<T> {
    pub value: T,
    pub attempts: u32,
}

pub struct Analyzer {
    generator: Arc<dyn ContentGenerator>,
    max_attempts: u32,
    seed: u64,
}

impl Analyzer {
    pub fn new(generator: Arc<dyn ContentGenerator>, max_attempts: u32, seed: u64) -> Self {
        Self {
            generator,
            max_attempts,
            seed,
        }
    }

    /// Units `unit` depends on. Tables may depend on tables; APIs on tables
    /// and other APIs. Self-references are dropped; unknown names are kept
    /// for the graph builder to report.
    pub async fn dependencies(
        &self,
        project: &Project,
        unit: &WorkUnit,
    ) -> Result<Analysis<Vec<UnitRef>>, AnalysisError> {
        let prompt = dependency_prompt(project, unit);
        let kind = unit.kind;
        let analysis = self
            .ask(&prompt, |text| parse_dependencies(kind, text))
            .await?;

        let own = unit.unit_ref();
        let mut deps: Vec<UnitRef> = Vec::new();
        for dep in analysis.value {
            if dep != own && !deps.contains(&dep) {
                deps.push(dep);
            }
        }
        Ok(Analysis {
            value: deps,
            attempts: analysis.attempts,
        })
    }

    /// Natural-language claims (API requirements or table properties).
    pub async fn claims(
        &self,
        unit: &WorkUnit,
        task: GenerationTask,
    ) -> Result<Analysis<Vec<String>>, AnalysisError> {
        let what = match task {
            GenerationTask::TableProperties => {
                "invariant properties every state of this table must satisfy"
            }
            _ => "behavioral requirements stated by this API's documentation",
        };
        let prompt = Prompt::new(
            task,
            &unit.name,
            format!("List the {what}. Answer with a JSON array of strings in a ```json block."),
            format!("# {} `{}`\n\n{}", unit.kind, unit.name, unit.description),
        );
        self.ask(&prompt, parse_claims).await
    }

    async fn ask<T, F>(&self, prompt: &Prompt, parse: F) -> Result<Analysis<T>, AnalysisError>
    where
        F: Fn(&str) -> Result<T, String>,
    {
        let mut feedback = Vec::new();
        let mut last_reason = String::from("no attempts made");

        for attempt in 1..=self.max_attempts {
            let context = GenerationContext {
                attempt,
                seed: self.seed,
                feedback: std::mem::take(&mut feedback),
                prior: Vec::new(),
            };
            match self.generator.generate(prompt, &context).await {
                Ok(text) => match parse(&extract_json_block(&text)) {
                    Ok(value) => {
                        debug!(
                            task = %prompt.task,
                            unit = %prompt.unit,
                            attempt,
                            "analysis parsed"
                        );
                        return Ok(Analysis {
                            value,
                            attempts: attempt,
                        });
                    }
                    Err(reason) => {
                        warn!(
                            task = %prompt.task,
                            unit = %prompt.unit,
                            attempt,
                            %reason,
                            "malformed analysis output"
                        );
                        feedback.push(Diagnostic::error(format!(
                            "could not parse your answer: {reason}"
                        )));
                        last_reason = reason;
                    }
                },
                Err(GeneratorError::Unavailable(msg)) => {
                    warn!(
                        task = %prompt.task,
                        unit = %prompt.unit,
                        attempt,
                        %msg,
                        "generator unavailable"
                    );
                    last_reason = format!("generator unavailable: {msg}");
                }
                Err(e) => return Err(AnalysisError::Rejected(e.to_string())),
            }
        }

        Err(AnalysisError::Malformed {
            attempts: self.max_attempts,
            reason: last_reason,
        })
    }
}

fn dependency_prompt(project: &Project, unit: &WorkUnit) -> Prompt {
    let names = |kind: UnitKind| {
        project
            .units(kind)
            .iter()
            .filter(|u| u.name != unit.name || u.kind != unit.kind)
            .map(|u| format!("- {}", u.name))
            .collect::<Vec<_>>()
            .join("\n")
    };

    match unit.kind {
        UnitKind::Table => Prompt::new(
            GenerationTask::TableDependencies,
            &unit.name,
            "Which of the listed tables does this table reference? \
             Answer with a JSON array of table names in a ```json block.",
            format!(
                "# Table `{}`\n\n{}\n\n# Other tables\n{}",
                unit.name,
                unit.description,
                names(UnitKind::Table)
            ),
        ),
        UnitKind::Api => Prompt::new(
            GenerationTask::ApiDependencies,
            &unit.name,
            "Which tables does this API read or write, and which other APIs does \
             it call? Answer with {\"tables\": [...], \"apis\": [...]} in a ```json block.",
            format!(
                "# API `{}`\n\n{}\n\n# Tables\n{}\n\n# Other APIs\n{}",
                unit.name,
                unit.description,
                names(UnitKind::Table),
                names(UnitKind::Api)
            ),
        ),
    }
}

fn string_list(value: &Value, what: &str) -> Result<Vec<String>, String> {
    let items = value
        .as_array()
        .ok_or_else(|| format!("expected a JSON array of {what}"))?;
    items
        .iter()
        .map(|v| {
            v.as_str()
                .map(|s| s.trim().to_string())
                .ok_or_else(|| format!("{what} must be strings, got {v}"))
        })
        .filter(|r| r.as_ref().map(|s| !s.is_empty()).unwrap_or(true))
        .collect()
}

fn parse_dependencies(kind: UnitKind, text: &str) -> Result<Vec<UnitRef>, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    match kind {
        UnitKind::Table => {
            let list = match &value {
                Value::Object(map) => map.get("tables").cloned().unwrap_or(Value::Array(vec![])),
                other => other.clone(),
            };
            Ok(string_list(&list, "table names")?
                .into_iter()
                .map(UnitRef::table)
                .collect())
        }
        UnitKind::Api => {
            let obj = value
                .as_object()
                .ok_or_else(|| "expected an object with \"tables\" and \"apis\"".to_string())?;
            let empty = Value::Array(vec![]);
            let tables = string_list(obj.get("tables").unwrap_or(&empty), "table names")?;
            let apis = string_list(obj.get("apis").unwrap_or(&empty), "API names")?;
            Ok(tables
                .into_iter()
                .map(UnitRef::table)
                .chain(apis.into_iter().map(UnitRef::api))
                .collect())
        }
    }
}

fn parse_claims(text: &str) -> Result<Vec<String>, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    string_list(&value, "claims")
}
