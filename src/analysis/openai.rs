//! OpenAI-compatible chat completions client

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use super::{AnalysisError, ChatMessage, ChatModel};
use crate::config::LlmConfig;

pub struct OpenAiChatModel {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

impl OpenAiChatModel {
    pub fn new(config: &LlmConfig, api_key: &str) -> Result<Self, AnalysisError> {
        if api_key.trim().is_empty() {
            return Err(AnalysisError::MissingApiKey(config.api_key_env.clone()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AnalysisError::Connectivity(e.to_string()))?;

        info!(
            "chat model initialized (model: {}, endpoint: {})",
            config.model, config.base_url
        );
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    fn request_body(&self, messages: &[ChatMessage]) -> Value {
        json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": messages,
        })
    }
}

fn parse_reply(body: &str) -> Result<String, AnalysisError> {
    let response: CompletionResponse = serde_json::from_str(body)
        .map_err(|e| AnalysisError::Model(format!("Malformed completion response: {}", e)))?;

    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| AnalysisError::Model("Completion contained no reply".to_string()))
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, AnalysisError> {
        debug!(messages = messages.len(), "sending chat completion");

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(messages))
            .send()
            .await
            .map_err(|e| AnalysisError::Connectivity(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| AnalysisError::Connectivity(e.to_string()))?;

        if !status.is_success() {
            return Err(AnalysisError::Model(format!(
                "Chat completion API error: {} {}",
                status, body
            )));
        }

        parse_reply(&body)
    }
}
