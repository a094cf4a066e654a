//! Least-used backend routing for a model.
//!
//! The backend config file is TOML:
//!
//! ```toml
//! [backends.primary]
//! base_url = "https://api.deepseek.com/v1"
//! api_key_env = "DEEPSEEK_API_KEY"
//! models = { "deepseek-chat" = "deepseek-chat" }
//!
//! [backends.mirror]
//! base_url = "http://10.0.0.5:8000/v1"
//! models = { "deepseek-chat" = "deepseek-v3" }
//!
//! [models]
//! "deepseek-chat" = ["primary", "mirror"]
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::error::{GeneratorError, ProoflineError};
use crate::generator::http::{HttpBackendConfig, HttpChatGenerator};
use crate::generator::{ContentGenerator, GenerationContext, Prompt};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendRouterConfig {
    #[serde(default)]
    pub backends: BTreeMap<String, HttpBackendConfig>,
    /// Model name -> backends able to serve it.
    #[serde(default)]
    pub models: BTreeMap<String, Vec<String>>,
}

impl BackendRouterConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ProoflineError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProoflineError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }
}

/// Dispatches each call to the backend with the fewest calls so far.
/// Ties go to the lexicographically smallest backend name.
pub struct BackendRouter {
    model: String,
    backends: Vec<(String, Arc<dyn ContentGenerator>)>,
    usage: Mutex<BTreeMap<String, u64>>,
}

impl BackendRouter {
    pub fn new(
        model: impl Into<String>,
        mut backends: Vec<(String, Arc<dyn ContentGenerator>)>,
    ) -> Self {
        backends.sort_by(|a, b| a.0.cmp(&b.0));
        let usage = backends.iter().map(|(name, _)| (name.clone(), 0)).collect();
        Self {
            model: model.into(),
            backends,
            usage: Mutex::new(usage),
        }
    }

    /// Build HTTP backends for `model` from config.
    pub fn from_config(config: &BackendRouterConfig, model: &str) -> Result<Self, GeneratorError> {
        let names = config
            .models
            .get(model)
            .ok_or_else(|| GeneratorError::Misconfigured(format!("model {model} not configured")))?;

        let mut backends: Vec<(String, Arc<dyn ContentGenerator>)> = Vec::new();
        for name in names {
            let Some(backend) = config.backends.get(name) else {
                warn!(model = %model, backend = %name, "model lists unknown backend, skipping");
                continue;
            };
            let generator = HttpChatGenerator::new(backend, model)?;
            backends.push((name.clone(), Arc::new(generator)));
        }

        if backends.is_empty() {
            return Err(GeneratorError::Misconfigured(format!(
                "no valid backend for model {model}"
            )));
        }
        Ok(Self::new(model, backends))
    }

    fn select(&self) -> Option<(&str, Arc<dyn ContentGenerator>)> {
        let mut usage = self.usage.lock().unwrap_or_else(PoisonError::into_inner);
        let (name, generator) = self
            .backends
            .iter()
            .min_by_key(|(name, _)| (usage.get(name).copied().unwrap_or(0), name.clone()))?;
        *usage.entry(name.clone()).or_insert(0) += 1;
        Some((name.as_str(), Arc::clone(generator)))
    }

    /// Calls routed to each backend so far.
    pub fn usage(&self) -> BTreeMap<String, u64> {
        self.usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ContentGenerator for BackendRouter {
    async fn generate(
        &self,
        prompt: &Prompt,
        context: &GenerationContext,
    ) -> Result<String, GeneratorError> {
        let (name, generator) = self.select().ok_or_else(|| {
            GeneratorError::Misconfigured(format!("no backend for model {}", self.model))
        })?;
        debug!(model = %self.model, backend = %name, "routing generation");
        generator.generate(prompt, context).await
    }
}
