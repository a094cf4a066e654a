use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{trace, warn};

use crate::domain::config::RunConfig;
use crate::domain::error::GeneratorError;
use crate::generator::{ContentGenerator, GenerationContext, Prompt, MODEL_IO_TARGET};
use crate::metrics::METRICS;

/// Wraps a backend with a per-call timeout and bounded retry of transient
/// failures. `Rejected` and `Misconfigured` are returned immediately.
pub struct RetryingGenerator {
    inner: Arc<dyn ContentGenerator>,
    timeout: Duration,
    retries: u32,
    backoff: Duration,
    log_model_io: bool,
}

impl RetryingGenerator {
    pub fn new(inner: Arc<dyn ContentGenerator>, timeout: Duration, retries: u32) -> Self {
        Self {
            inner,
            timeout,
            retries,
            backoff: Duration::from_secs(1),
            log_model_io: false,
        }
    }

    pub fn from_config(inner: Arc<dyn ContentGenerator>, config: &RunConfig) -> Self {
        Self::new(
            inner,
            Duration::from_secs(config.generator_timeout_secs),
            config.generator_retries,
        )
        .with_model_io_logging(config.log_model_io)
    }

    /// Base delay; retry `n` waits `n * backoff`.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_model_io_logging(mut self, enabled: bool) -> Self {
        self.log_model_io = enabled;
        self
    }

    async fn call_once(
        &self,
        prompt: &Prompt,
        context: &GenerationContext,
    ) -> Result<String, GeneratorError> {
        METRICS.inc_generator_calls();
        match tokio::time::timeout(self.timeout, self.inner.generate(prompt, context)).await {
            Ok(result) => result,
            Err(_) => Err(GeneratorError::Unavailable(format!(
                "timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

#[async_trait]
impl ContentGenerator for RetryingGenerator {
    async fn generate(
        &self,
        prompt: &Prompt,
        context: &GenerationContext,
    ) -> Result<String, GeneratorError> {
        if self.log_model_io {
            trace!(
                target: MODEL_IO_TARGET,
                task = %prompt.task,
                unit = %prompt.unit,
                attempt = context.attempt,
                instructions = %prompt.instructions,
                input = %context.render_user_message(prompt),
                "model input"
            );
        }

        let mut retry = 0;
        loop {
            match self.call_once(prompt, context).await {
                Ok(text) => {
                    if self.log_model_io {
                        trace!(
                            target: MODEL_IO_TARGET,
                            task = %prompt.task,
                            unit = %prompt.unit,
                            output = %text,
                            "model output"
                        );
                    }
                    return Ok(text);
                }
                Err(e) if e.is_transient() && retry < self.retries => {
                    retry += 1;
                    warn!(
                        task = %prompt.task,
                        unit = %prompt.unit,
                        retry,
                        error = %e,
                        "transient generator failure, retrying"
                    );
                    tokio::time::sleep(self.backoff * retry).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
