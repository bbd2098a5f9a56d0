//! Completion Client
//!
//! Text completion over the OpenAI chat completions API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sow_utils::{OpenAiConfig, SowError, SowResult};
use std::time::Duration;
use tracing::debug;

/// Given a prompt, return the model's text completion.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &str, model: &str, temperature: f32) -> SowResult<String>;
}

pub struct OpenAiClient {
    client: Client,
    api_url: String,
    api_key: String,
    max_tokens: u32,
}

impl OpenAiClient {
    pub fn new(config: &OpenAiConfig) -> SowResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| SowError::configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl CompletionService for OpenAiClient {
    async fn complete(&self, prompt: &str, model: &str, temperature: f32) -> SowResult<String> {
        let request = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.max_tokens,
            temperature,
        };

        debug!(model, prompt_chars = prompt.len(), "Requesting completion");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SowError::completion_service(format!(
                "completion API returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| SowError::completion_service(format!("Failed to parse completion response: {}", e)))?;

        first_choice_content(result)
    }
}

fn first_choice_content(response: ChatResponse) -> SowResult<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .ok_or_else(|| SowError::completion_service("No response content"))
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}
