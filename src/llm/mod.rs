//! LLM provider abstraction
//!
//! The core never depends on a concrete LLM. This module defines the chat
//! message shapes (OpenAI tool-calling dialect, which every supported
//! vendor speaks), the [`LlmProvider`] trait the adapters consume, and the
//! skill router built on top of it.
//!
//! - [`openai`] - reqwest client for any OpenAI-compatible endpoint
//! - [`router`] - free-form text → skill resolution and the bounded chat
//!   tool loop

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod openai;
pub mod router;

pub use openai::OpenAiProvider;
pub use router::SkillRouter;

/// A function invocation requested by the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments string, as the wire format carries it
    pub arguments: String,
}

/// A tool call attached to an assistant message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

/// One chat message in provider wire format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// A plain message with text content
    pub fn text(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// A tool-result message answering a tool call
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Whether this assistant message requests tool calls
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().map(|t| !t.is_empty()).unwrap_or(false)
    }
}

/// A tool definition offered to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: ToolFunctionDef,
}

/// Function half of a tool definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDef {
    /// Define a function tool
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: ToolFunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// Abstract chat interface with tool calling
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// One model turn: messages plus offered tools in, assistant message out
    async fn chat(&self, messages: &[ChatMessage], tools: &[ToolDef]) -> Result<ChatMessage>;

    /// One model turn with tool use required: the model must answer with a
    /// tool call rather than prose
    async fn chat_required(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDef],
    ) -> Result<ChatMessage>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_result_shape() {
        let msg = ChatMessage::tool_result("call_1", "{\"ok\":true}");
        assert_eq!(msg.role, "tool");
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_has_tool_calls() {
        let mut msg = ChatMessage::text("assistant", "hello");
        assert!(!msg.has_tool_calls());
        msg.tool_calls = Some(vec![ToolCall {
            id: "call_1".into(),
            call_type: "function".into(),
            function: FunctionCall {
                name: "check_status".into(),
                arguments: "{}".into(),
            },
        }]);
        assert!(msg.has_tool_calls());
        msg.tool_calls = Some(vec![]);
        assert!(!msg.has_tool_calls());
    }
}
