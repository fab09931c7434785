//! OpenAI-compatible chat provider
//!
//! Any vendor speaking the `/chat/completions` dialect slots in through
//! the configured base URL, key and model.

use super::{ChatMessage, LlmProvider, ToolDef};
use crate::{ProofportError, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

/// Client for an OpenAI-compatible endpoint
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    /// Create a provider client
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ProofportError::config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }

    async fn completion(&self, body: Value) -> Result<ChatMessage> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProofportError::dependency(format!("LLM provider unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProofportError::dependency(format!(
                "LLM provider returned {}: {}",
                status, body
            )));
        }

        let envelope: Value = response.json().await?;
        let message = envelope
            .pointer("/choices/0/message")
            .cloned()
            .ok_or_else(|| ProofportError::dependency("LLM response carries no message"))?;
        Ok(serde_json::from_value(message)?)
    }

    fn body(&self, messages: &[ChatMessage], tools: &[ToolDef]) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }
        body
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat(&self, messages: &[ChatMessage], tools: &[ToolDef]) -> Result<ChatMessage> {
        self.completion(self.body(messages, tools)).await
    }

    async fn chat_required(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDef],
    ) -> Result<ChatMessage> {
        let mut body = self.body(messages, tools);
        body["tool_choice"] = json!("required");
        self.completion(body).await
    }
}
