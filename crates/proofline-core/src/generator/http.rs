//! OpenAI-compatible chat completions backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::error::GeneratorError;
use crate::generator::{ContentGenerator, GenerationContext, Prompt};

/// One `[backends.<name>]` entry of the backend config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpBackendConfig {
    /// e.g. `https://api.openai.com/v1`
    pub base_url: String,

    /// Environment variable holding the API key. Unset means no auth header.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Model alias -> model id understood by this backend.
    #[serde(default)]
    pub models: BTreeMap<String, String>,
}

impl HttpBackendConfig {
    /// Backend-specific id for `model`, or `model` itself.
    pub fn resolve_model<'a>(&'a self, model: &'a str) -> &'a str {
        self.models.get(model).map(String::as_str).unwrap_or(model)
    }
}

pub struct HttpChatGenerator {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl HttpChatGenerator {
    pub fn new(config: &HttpBackendConfig, model: &str) -> Result<Self, GeneratorError> {
        let client = Client::builder()
            .user_agent(concat!("proofline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GeneratorError::Misconfigured(format!("http client: {e}")))?;

        let api_key = match &config.api_key_env {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                GeneratorError::Misconfigured(format!("environment variable {var} is not set"))
            })?),
            None => None,
        };

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.resolve_model(model).to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Map a non-success HTTP status to the gateway taxonomy.
fn classify_status(status: StatusCode, body: String) -> GeneratorError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        GeneratorError::Unavailable(format!("HTTP {status}: {body}"))
    } else {
        GeneratorError::Rejected(format!("HTTP {status}: {body}"))
    }
}

/// Extract the completion text from a chat completions response.
fn completion_text(data: &serde_json::Value) -> Result<String, GeneratorError> {
    let choice = &data["choices"][0];
    if choice["finish_reason"].as_str() == Some("content_filter") {
        return Err(GeneratorError::Rejected("content filtered".to_string()));
    }
    match choice["message"]["content"].as_str() {
        Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
        _ => Err(GeneratorError::Unavailable("empty completion".to_string())),
    }
}

#[async_trait]
impl ContentGenerator for HttpChatGenerator {
    async fn generate(
        &self,
        prompt: &Prompt,
        context: &GenerationContext,
    ) -> Result<String, GeneratorError> {
        let body = serde_json::json!({
            "model": self.model,
            "seed": context.seed,
            "messages": [
                { "role": "system", "content": prompt.instructions },
                { "role": "user", "content": context.render_user_message(prompt) },
            ],
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GeneratorError::Unavailable(format!("transport: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, text));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GeneratorError::Unavailable(format!("invalid response: {e}")))?;

        debug!(
            model = %self.model,
            task = %prompt.task,
            unit = %prompt.unit,
            "completion received"
        );
        completion_text(&data)
    }
}
