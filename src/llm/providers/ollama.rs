use crate::config::{GenerationParams, LlmConfig};
use crate::llm::{CompletionProvider, LlmError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

pub struct OllamaProvider {
    client: reqwest::Client,
    api_url: String,
    model: String,
}

#[derive(Serialize, Debug)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    // The prompt already carries the model's instruction framing
    raw: bool,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize, Debug, PartialEq)]
struct OllamaOptions {
    num_predict: u32,
    temperature: f32,
    repeat_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
}

impl From<&GenerationParams> for OllamaOptions {
    fn from(params: &GenerationParams) -> Self {
        Self {
            num_predict: params.max_new_tokens,
            temperature: params.effective_temperature(),
            repeat_penalty: params.repetition_penalty,
            top_p: params.top_p.filter(|_| params.do_sample),
            top_k: params.top_k.filter(|_| params.do_sample),
        }
    }
}

#[derive(Deserialize, Debug)]
struct OllamaResponse {
    response: String,
    #[serde(default)]
    done: Option<bool>,
}

impl OllamaProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_url = config
            .api_url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434/api/generate".to_string());

        // The manager enforces the generation timeout; this only bounds a hung socket
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            api_url,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl CompletionProvider for OllamaProvider {
    async fn complete(&self, prompt: &str, params: &GenerationParams) -> Result<String, LlmError> {
        info!("Sending request to Ollama with model: {}", self.model);
        debug!("API URL: {}", self.api_url);

        let request = OllamaRequest {
            model: &self.model,
            prompt,
            raw: true,
            stream: false,
            options: params.into(),
        };

        debug!("Sending request to Ollama: {:?}", request.options);

        let response = self
            .client
            .post(&self.api_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = match response.text().await {
                Ok(body) => format!(" - Response body: {}", body),
                Err(_) => String::new(),
            };

            error!("Ollama API responded with status code: {}{}", status, error_body);
            return Err(LlmError::ResponseError(format!(
                "Ollama API responded with status code: {}{}",
                status, error_body
            )));
        }

        let response_text = response
            .text()
            .await
            .map_err(|e| LlmError::ResponseError(format!("Failed to read response body: {}", e)))?;

        let ollama_response = serde_json::from_str::<OllamaResponse>(&response_text).map_err(|e| {
            error!("Failed to parse Ollama response: {} - Response was: {}", e, response_text);
            LlmError::ResponseError(format!(
                "Failed to parse Ollama response: {} - Response was: {}",
                e, response_text
            ))
        })?;

        if ollama_response.done == Some(false) {
            debug!("Ollama reported an unfinished generation");
        }

        Ok(ollama_response.response)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greedy_options_drop_sampling_cutoffs() {
        let params = GenerationParams {
            top_p: Some(0.95),
            top_k: Some(50),
            ..GenerationParams::default()
        };
        let options = OllamaOptions::from(&params);

        assert_eq!(
            options,
            OllamaOptions {
                num_predict: 200,
                temperature: 0.0,
                repeat_penalty: 2.0,
                top_p: None,
                top_k: None,
            }
        );
    }

    #[test]
    fn request_is_raw_and_unstreamed() {
        let params = GenerationParams {
            do_sample: true,
            temperature: 0.7,
            top_p: Some(0.95),
            ..GenerationParams::default()
        };
        let request = OllamaRequest {
            model: "sql-assistant",
            prompt: "[INST]q[/INST]",
            raw: true,
            stream: false,
            options: (&params).into(),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["raw"], true);
        assert_eq!(json["stream"], false);
        assert_eq!(json["options"]["top_p"].as_f64().map(|v| (v * 100.0).round()), Some(95.0));
        assert!(json["options"].get("top_k").is_none());
    }

    #[test]
    fn defaults_to_local_endpoint() {
        let config = crate::config::AppConfig::default().llm;
        let provider = OllamaProvider::new(&config).unwrap();
        assert_eq!(provider.api_url, "http://localhost:11434/api/generate");
        assert_eq!(provider.name(), "ollama");
    }
}
