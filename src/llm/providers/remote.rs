use crate::config::{GenerationParams, LlmConfig};
use crate::llm::{CompletionProvider, LlmError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

/// OpenAI-compatible `/v1/completions` backend (vLLM, TGI, llama.cpp server).
pub struct RemoteLlmProvider {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    repetition_penalty: f32,
    n: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    text: String,
}

impl RemoteLlmProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_url = config.api_url.clone().ok_or_else(|| {
            LlmError::ConfigError("API URL is required for remote LLM provider".to_string())
        })?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            api_url,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    fn request<'a>(&'a self, prompt: &'a str, params: &GenerationParams) -> CompletionRequest<'a> {
        CompletionRequest {
            model: &self.model,
            prompt,
            max_tokens: params.max_new_tokens,
            temperature: params.effective_temperature(),
            top_p: params.top_p.filter(|_| params.do_sample),
            top_k: params.top_k.filter(|_| params.do_sample),
            repetition_penalty: params.repetition_penalty,
            n: 1,
        }
    }
}

#[async_trait]
impl CompletionProvider for RemoteLlmProvider {
    async fn complete(&self, prompt: &str, params: &GenerationParams) -> Result<String, LlmError> {
        let mut builder = self.client.post(&self.api_url).json(&self.request(prompt, params));
        if let Some(api_key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            error!("Completion API responded with status code: {}", response.status());
            return Err(LlmError::ResponseError(format!(
                "API responded with status code: {}",
                response.status()
            )));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ResponseError(e.to_string()))?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::ResponseError("No choices in response".to_string()))?;

        debug!("Remote completion returned {} chars", choice.text.len());
        Ok(choice.text)
    }

    fn name(&self) -> &str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote_config() -> LlmConfig {
        let mut config = crate::config::AppConfig::default().llm;
        config.backend = "remote".to_string();
        config.api_url = Some("http://gpu-box:8080/v1/completions".to_string());
        config
    }

    #[test]
    fn requires_api_url() {
        let mut config = remote_config();
        config.api_url = None;
        assert!(matches!(RemoteLlmProvider::new(&config), Err(LlmError::ConfigError(_))));
    }

    #[test]
    fn api_key_is_optional() {
        let provider = RemoteLlmProvider::new(&remote_config()).unwrap();
        assert!(provider.api_key.is_none());
    }

    #[test]
    fn request_carries_decoding_parameters() {
        let provider = RemoteLlmProvider::new(&remote_config()).unwrap();
        let params = GenerationParams::default();
        let json = serde_json::to_value(provider.request("prompt", &params)).unwrap();

        assert_eq!(json["model"], "sql-assistant");
        assert_eq!(json["max_tokens"], 200);
        assert_eq!(json["temperature"], 0.0);
        assert_eq!(json["repetition_penalty"], 2.0);
        assert_eq!(json["n"], 1);
        assert!(json.get("top_p").is_none());
    }

    #[test]
    fn parses_first_choice_text() {
        let body = r#"{"id":"cmpl-1","choices":[{"index":0,"text":" select name from project;","finish_reason":"stop"}]}"#;
        let parsed: CompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].text, " select name from project;");
    }
}
