//! LLM client for the advice flow
//!
//! Talks to an OpenAI-compatible chat-completions endpoint (OpenRouter by
//! default). Uses a long-lived reqwest::Client for connection pooling.

use crate::config::LlmConfig;
use crate::error::GoldAgentError;
use crate::memory::MessageRole;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

/// One entry of the context handed to the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LlmMessage {
    pub role: String,
    pub content: String,
}

impl LlmMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role: role.as_str().to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }
}

/// Trait for text completion
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete `prompt` given the preceding `history` (system message first)
    async fn complete(&self, prompt: &str, history: &[LlmMessage]) -> Result<String>;
}

/// Reusable chat-completions client (connection-pooled)
pub struct OpenRouterClient {
    client: Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenRouterClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    async fn complete(&self, prompt: &str, history: &[LlmMessage]) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| GoldAgentError::LlmError("OPENROUTER_API_KEY not configured".to_string()))?;

        let request = build_request(&self.model, prompt, history, self.temperature, self.max_tokens);

        info!(model = %self.model, context_messages = history.len(), "Calling LLM");

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("LLM request failed: {}", e);
                GoldAgentError::LlmError(format!("LLM request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("LLM error response ({}): {}", status, error_text);
            return Err(GoldAgentError::LlmError(format!(
                "LLM API returned {}: {}",
                status, error_text
            )));
        }

        let completion: ChatCompletionResponse = response.json().await.map_err(|e| {
            error!("Failed to parse LLM response: {}", e);
            GoldAgentError::LlmError(format!("LLM parse error: {}", e))
        })?;

        extract_answer(completion)
    }
}

fn build_request(
    model: &str,
    prompt: &str,
    history: &[LlmMessage],
    temperature: f32,
    max_tokens: u32,
) -> ChatCompletionRequest {
    let mut messages = history.to_vec();
    messages.push(LlmMessage::new(MessageRole::User, prompt));

    ChatCompletionRequest {
        model: model.to_string(),
        messages,
        max_tokens,
        temperature,
    }
}

fn extract_answer(completion: ChatCompletionResponse) -> Result<String> {
    let answer = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| GoldAgentError::LlmError("No choices in LLM response".to_string()))?
        .message
        .content
        .trim()
        .to_string();

    if answer.is_empty() {
        return Err(GoldAgentError::LlmError("Empty response from LLM".to_string()));
    }

    Ok(answer)
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<LlmMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}
