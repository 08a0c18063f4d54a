//! LLM provider contract and message/tool types
//!
//! Defines the pluggable interface that LLM adapters implement, plus
//! the OpenAI-style message, tool-call, and usage types shared by the
//! orchestrator and tool dispatcher.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reason a completion terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
}

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool/function call emitted by the model.
///
/// `arguments` is the parsed JSON object; adapters normalize the
/// provider's stringified form before constructing this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    /// OpenAI wire form with stringified arguments
    pub fn to_wire(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "type": "function",
            "function": {
                "name": self.name,
                "arguments": self.arguments.to_string(),
            },
        })
    }
}

/// One message in the LLM conversation history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: Some(content.into()),
            name: None,
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: Some(content.into()),
            name: None,
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: Some(content.into()),
            name: None,
            tool_call_id: None,
            tool_calls: None,
        }
    }

    /// Assistant message that carries tool calls
    pub fn assistant_with_tools(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content,
            name: None,
            tool_call_id: None,
            tool_calls: Some(tool_calls),
        }
    }

    /// Tool result message, keyed back to the originating call
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(content.into()),
            name: Some(name.into()),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
        }
    }

    /// OpenAI wire form for the chat-completions request body
    pub fn to_wire(&self) -> Value {
        let mut obj = serde_json::Map::new();
        let role = match self.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        };
        obj.insert("role".to_string(), Value::String(role.to_string()));
        if let Some(content) = &self.content {
            obj.insert("content".to_string(), Value::String(content.clone()));
        }
        if let Some(name) = &self.name {
            obj.insert("name".to_string(), Value::String(name.clone()));
        }
        if let Some(id) = &self.tool_call_id {
            obj.insert("tool_call_id".to_string(), Value::String(id.clone()));
        }
        if let Some(calls) = &self.tool_calls {
            obj.insert(
                "tool_calls".to_string(),
                Value::Array(calls.iter().map(|c| c.to_wire()).collect()),
            );
        }
        Value::Object(obj)
    }
}

/// Definition of a tool the model may call (OpenAI function format)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn to_wire(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            },
        })
    }
}

/// Token usage for one completion
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Response from a completion call
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<FinishReason>,
    pub model: Option<String>,
}

impl LlmResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// One chunk of a streamed completion.
///
/// Tool-call deltas are reassembled inside the adapter; the chunk whose
/// `finish_reason` is `ToolCalls` carries the fully assembled list.
#[derive(Debug, Clone, Default)]
pub struct LlmChunk {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<FinishReason>,
    pub model: Option<String>,
}

/// LLM error taxonomy. Adapters map vendor failures onto these; no
/// vendor error types cross the adapter boundary.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("LLM authentication failed: {0}")]
    Authentication(String),
    #[error("LLM context length exceeded: {0}")]
    ContextLength(String),
    #[error("LLM provider error: {0}")]
    Provider(String),
}

impl LlmError {
    /// Transient errors are retried by the orchestrator; the rest are
    /// surfaced immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::RateLimited(_) | LlmError::Provider(_))
    }
}

/// Pluggable LLM provider contract
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate one completion
    async fn complete(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<LlmResponse, LlmError>;

    /// Stream a completion as incremental chunks
    async fn stream_complete(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<BoxStream<'static, Result<LlmChunk, LlmError>>, LlmError>;

    /// Total tokens consumed by this provider instance
    fn total_tokens_used(&self) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, MessageRole::User);
        assert_eq!(msg.content.as_deref(), Some("Hello"));

        let tool = Message::tool_result("call_1", "create_callback_task", "done");
        assert_eq!(tool.role, MessageRole::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(tool.name.as_deref(), Some("create_callback_task"));
    }

    #[test]
    fn test_tool_call_wire_stringifies_arguments() {
        let call = ToolCall {
            id: "tc_1".to_string(),
            name: "transfer_call".to_string(),
            arguments: serde_json::json!({"call_id": "abc"}),
        };
        let wire = call.to_wire();
        assert_eq!(wire["function"]["name"], "transfer_call");
        let args: Value =
            serde_json::from_str(wire["function"]["arguments"].as_str().unwrap()).unwrap();
        assert_eq!(args["call_id"], "abc");
    }

    #[test]
    fn test_assistant_wire_includes_tool_calls() {
        let msg = Message::assistant_with_tools(
            None,
            vec![ToolCall {
                id: "tc_2".to_string(),
                name: "send_notification".to_string(),
                arguments: serde_json::json!({}),
            }],
        );
        let wire = msg.to_wire();
        assert_eq!(wire["role"], "assistant");
        assert!(wire.get("content").is_none());
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "send_notification");
    }

    #[test]
    fn test_transient_classification() {
        assert!(LlmError::RateLimited("429".into()).is_transient());
        assert!(LlmError::Provider("boom".into()).is_transient());
        assert!(!LlmError::Authentication("401".into()).is_transient());
        assert!(!LlmError::ContextLength("too long".into()).is_transient());
    }
}
