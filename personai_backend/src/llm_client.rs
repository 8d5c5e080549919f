use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{GenerationOptions, ServiceConfig};
use crate::http_client::build_http_client;

pub const GENERATE_API: &str = "generate";

/// Outcome of a single backend call. Exactly one is produced per call.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceResult {
    Success { text: String },
    HttpError { status: u16, body: String },
    Timeout,
    TransportError { message: String },
}

/// The black-box text generator behind the relay.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn infer(
        &self,
        model: &str,
        prompt: &str,
        options: &GenerationOptions,
        timeout: Duration,
    ) -> InferenceResult;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: &'a GenerationOptions,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
}

const MISSING_RESPONSE_FIELD: &str = "[Backend reply had no response field]";

/// Client for Ollama's native `/api/generate` endpoint (non-streaming).
#[derive(Clone)]
pub struct LlmClient {
    api_url: String,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_url: &str, allow_system_proxy: bool) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            client: build_http_client(allow_system_proxy),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(&config.llm_api_url, config.enable_system_proxy)
    }

    pub fn generate_url(&self) -> String {
        format!("{}/api/{}", self.api_url, GENERATE_API)
    }

    async fn send_generate(
        &self,
        model: &str,
        prompt: &str,
        options: &GenerationOptions,
        timeout: Duration,
    ) -> InferenceResult {
        let request = GenerateRequest {
            model,
            prompt,
            stream: false,
            options,
        };

        let response = match self
            .client
            .post(self.generate_url())
            .timeout(timeout)
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) => return classify_transport_error(error),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(error) => return classify_transport_error(error),
        };
        tracing::debug!("Backend replied with HTTP {} ({} bytes)", status, body.len());

        if status != reqwest::StatusCode::OK {
            return InferenceResult::HttpError {
                status: status.as_u16(),
                body,
            };
        }

        match serde_json::from_str::<GenerateResponse>(&body) {
            Ok(parsed) => InferenceResult::Success {
                text: parsed
                    .response
                    .unwrap_or_else(|| MISSING_RESPONSE_FIELD.to_string()),
            },
            Err(error) => InferenceResult::TransportError {
                message: format!(
                    "malformed backend response: {} | body: {}",
                    error,
                    body.chars().take(200).collect::<String>()
                ),
            },
        }
    }
}

#[async_trait]
impl InferenceBackend for LlmClient {
    async fn infer(
        &self,
        model: &str,
        prompt: &str,
        options: &GenerationOptions,
        timeout: Duration,
    ) -> InferenceResult {
        tracing::info!("Calling {} with model {}", self.generate_url(), model);
        // Hard outer bound on the whole exchange, body read included.
        match tokio::time::timeout(timeout, self.send_generate(model, prompt, options, timeout))
            .await
        {
            Ok(result) => result,
            Err(_) => InferenceResult::Timeout,
        }
    }
}

fn classify_transport_error(error: reqwest::Error) -> InferenceResult {
    if error.is_timeout() {
        InferenceResult::Timeout
    } else {
        InferenceResult::TransportError {
            message: error.to_string(),
        }
    }
}
