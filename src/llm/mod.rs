pub mod models;
pub mod providers;

use crate::config::{GenerationParams, LlmConfig};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM connection error: {0}")]
    ConnectionError(String),
    #[error("LLM response error: {0}")]
    ResponseError(String),
    #[error("LLM configuration error: {0}")]
    ConfigError(String),
    #[error("LLM generation timed out after {0}s")]
    Timeout(u64),
}

/// A text-completion backend: prompt in, continuation out.
///
/// Implementations return only the generated continuation, never the prompt.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str, params: &GenerationParams) -> Result<String, LlmError>;

    fn name(&self) -> &str;
}

/// Owns the configured provider and enforces single-flight generation.
///
/// A provider is assumed to sit on one accelerator, so at most one
/// generation is in flight per manager; other callers queue on the gate.
pub struct LlmManager {
    provider: Box<dyn CompletionProvider>,
    params: GenerationParams,
    timeout: Duration,
    model: String,
    gate: Mutex<()>,
}

impl LlmManager {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let provider: Box<dyn CompletionProvider> = match config.backend.as_str() {
            "remote" => Box::new(providers::remote::RemoteLlmProvider::new(config)?),
            "ollama" => Box::new(providers::ollama::OllamaProvider::new(config)?),
            _ => {
                return Err(LlmError::ConfigError(format!(
                    "Unsupported LLM backend: {}",
                    config.backend
                )))
            }
        };

        Ok(Self::with_provider(
            provider,
            config.generation.clone(),
            Duration::from_secs(config.timeout_secs),
        )
        .with_model(&config.model))
    }

    pub fn with_provider(
        provider: Box<dyn CompletionProvider>,
        params: GenerationParams,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            params,
            timeout,
            model: String::new(),
            gate: Mutex::new(()),
        }
    }

    fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn backend(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Runs one generation and returns the prompt followed by the continuation,
    /// the same shape a causal model decode produces.
    pub async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let _in_flight = self.gate.lock().await;

        info!("Generating with backend '{}'", self.provider.name());
        debug!("Prompt: {}", prompt);

        let continuation = tokio::time::timeout(self.timeout, self.provider.complete(prompt, &self.params))
            .await
            .map_err(|_| {
                warn!("Generation exceeded {}s", self.timeout.as_secs());
                LlmError::Timeout(self.timeout.as_secs())
            })??;

        debug!("Raw continuation: {}", continuation);
        Ok(format!("{}{}", prompt, continuation))
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays canned continuations and records every prompt it receives.
    pub struct ScriptedProvider {
        replies: StdMutex<VecDeque<Result<String, LlmError>>>,
        pub prompts: StdMutex<Vec<String>>,
        pub calls: AtomicUsize,
    }

    impl ScriptedProvider {
        pub fn new(replies: Vec<Result<String, LlmError>>) -> Self {
            Self {
                replies: StdMutex::new(replies.into()),
                prompts: StdMutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionProvider for std::sync::Arc<ScriptedProvider> {
        async fn complete(&self, prompt: &str, _params: &GenerationParams) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::ResponseError("script exhausted".to_string())))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    pub fn manager(provider: std::sync::Arc<ScriptedProvider>) -> LlmManager {
        LlmManager::with_provider(Box::new(provider), GenerationParams::default(), Duration::from_secs(5))
    }
}
