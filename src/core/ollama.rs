use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::ports::TextGenerator;
use crate::utils::error::{PipelineError, Result};

/// HTTP client for a local Ollama instance.
pub struct OllamaClient {
    base_url: String,
    model: String,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeout_secs: timeout.as_secs(),
            client,
        })
    }

    /// Default local instance with the model the pipeline was tuned on.
    pub fn default_local() -> Result<Self> {
        Self::new(
            "http://localhost:11434",
            "codellama:latest",
            Duration::from_secs(60),
        )
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[async_trait]
impl TextGenerator for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions { temperature: 0.1 },
        };

        tracing::debug!(model = %self.model, "calling Ollama at {}", url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PipelineError::GenerationTimeout {
                        seconds: self.timeout_secs,
                    }
                } else {
                    PipelineError::ApiError(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::GenerationError {
                message: format!("Ollama returned status {}: {}", status, body),
            });
        }

        let parsed: GenerateResponse = response.json().await?;
        Ok(parsed.response)
    }
}

/// Scripted generator for tests: plays back queued responses or failures,
/// then repeats the fallback if one was configured.
pub struct MockGenerator {
    script: Mutex<VecDeque<std::result::Result<String, String>>>,
    fallback: Option<String>,
    delay: Option<Duration>,
}

impl MockGenerator {
    pub fn new(response: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(response.to_string()),
            delay: None,
        }
    }

    pub fn with_script(script: Vec<std::result::Result<String, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            delay: None,
        }
    }

    /// Delay every response, for exercising caller-level timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self
            .script
            .lock()
            .expect("mock script lock poisoned")
            .pop_front();
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(PipelineError::GenerationError { message }),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| PipelineError::GenerationError {
                    message: "mock script exhausted".to_string(),
                }),
        }
    }
}
