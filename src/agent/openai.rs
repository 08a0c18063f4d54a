//! OpenAI-compatible LLM provider
//!
//! Talks to any chat-completions endpoint that follows the OpenAI wire
//! format. Responses are parsed from raw JSON values rather than strict
//! structs so that minor provider deviations (arguments as objects
//! instead of strings, content as part arrays) do not break parsing.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::agent::llm::{
    FinishReason, LlmChunk, LlmError, LlmProvider, LlmResponse, Message, TokenUsage, ToolCall,
    ToolDefinition,
};
use crate::config::Config;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// OpenAI-compatible chat-completions provider
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    tokens_used: Arc<AtomicU64>,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
            tokens_used: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Point at a different OpenAI-compatible endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn from_config(config: &Config) -> Self {
        let model = if config.openai_model.is_empty() {
            DEFAULT_MODEL.to_string()
        } else {
            config.openai_model.clone()
        };
        Self::new(config.openai_api_key.clone(), model)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        stream: bool,
    ) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages.iter().map(|m| m.to_wire()).collect::<Vec<_>>(),
        });
        if let Some(tools) = tools {
            if !tools.is_empty() {
                body["tools"] = Value::Array(tools.iter().map(|t| t.to_wire()).collect());
                body["tool_choice"] = Value::String("auto".to_string());
            }
        }
        if stream {
            body["stream"] = Value::Bool(true);
        }
        body
    }

    /// Map an HTTP failure onto the error taxonomy. No reqwest or
    /// vendor error types escape this adapter.
    fn map_http_error(status: reqwest::StatusCode, body: &str) -> LlmError {
        if status.as_u16() == 429 {
            return LlmError::RateLimited(format!("{status}: {body}"));
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return LlmError::Authentication(format!("{status}: {body}"));
        }
        let lower = body.to_lowercase();
        if lower.contains("context_length") || lower.contains("maximum context length") {
            return LlmError::ContextLength(format!("{status}: {body}"));
        }
        LlmError::Provider(format!("{status}: {body}"))
    }

    async fn post_completions(
        &self,
        body: &Value,
    ) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::Provider(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_http_error(status, &body));
        }
        Ok(response)
    }
}

/// Normalize a wire tool-call `arguments` value: providers send either
/// a JSON string or a raw object. Unparseable strings become `{}`.
fn parse_arguments(value: Option<&Value>) -> Value {
    match value {
        Some(Value::String(s)) => {
            if s.trim().is_empty() {
                return Value::Object(Default::default());
            }
            serde_json::from_str(s).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "tool-call arguments were not valid JSON, using empty object");
                Value::Object(Default::default())
            })
        }
        Some(Value::Object(map)) => Value::Object(map.clone()),
        _ => Value::Object(Default::default()),
    }
}

fn parse_finish_reason(s: &str) -> FinishReason {
    match s {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Error,
    }
}

/// Extract content that may be a plain string or an array of typed
/// content parts.
fn extract_content(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(parts)) => {
            let texts: Vec<&str> = parts
                .iter()
                .filter(|p| p.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect();
            if texts.is_empty() {
                None
            } else {
                Some(texts.join(""))
            }
        }
        _ => None,
    }
}

fn extract_tool_calls(message: &Value) -> Vec<ToolCall> {
    message
        .get("tool_calls")
        .and_then(|tc| tc.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|tc| {
                    let func = tc.get("function")?;
                    Some(ToolCall {
                        id: tc
                            .get("id")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        name: func
                            .get("name")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        arguments: parse_arguments(func.get("arguments")),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// An in-flight tool call being reassembled from indexed stream deltas
#[derive(Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments_buf: String,
}

/// Table of in-flight tool calls keyed by stream index
#[derive(Default)]
struct ToolCallAssembler {
    partial: BTreeMap<u64, PartialToolCall>,
}

impl ToolCallAssembler {
    fn absorb(&mut self, deltas: &Value) {
        let Some(arr) = deltas.as_array() else { return };
        for delta in arr {
            let index = delta.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
            let entry = self.partial.entry(index).or_default();
            if let Some(id) = delta.get("id").and_then(|v| v.as_str()) {
                entry.id.push_str(id);
            }
            if let Some(func) = delta.get("function") {
                if let Some(name) = func.get("name").and_then(|v| v.as_str()) {
                    entry.name.push_str(name);
                }
                if let Some(args) = func.get("arguments").and_then(|v| v.as_str()) {
                    entry.arguments_buf.push_str(args);
                }
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.partial.is_empty()
    }

    /// Parse all buffered argument fragments; invalid JSON yields an
    /// empty object with a warning.
    fn finish(self) -> Vec<ToolCall> {
        self.partial
            .into_values()
            .map(|p| {
                let arguments = if p.arguments_buf.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&p.arguments_buf).unwrap_or_else(|e| {
                        tracing::warn!(tool = %p.name, error = %e, "streamed tool-call arguments were not valid JSON");
                        Value::Object(Default::default())
                    })
                };
                ToolCall {
                    id: p.id,
                    name: p.name,
                    arguments,
                }
            })
            .collect()
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<LlmResponse, LlmError> {
        let body = self.request_body(messages, tools, false);
        let response = self.post_completions(&body).await?;

        let text = response
            .text()
            .await
            .map_err(|e| LlmError::Provider(format!("failed to read response body: {e}")))?;
        let raw: Value = serde_json::from_str(text.trim())
            .map_err(|e| LlmError::Provider(format!("invalid JSON response: {e}")))?;

        let choice = raw
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|arr| arr.first())
            .ok_or_else(|| LlmError::Provider("no choices in response".to_string()))?;
        let message = choice
            .get("message")
            .ok_or_else(|| LlmError::Provider("no message in response".to_string()))?;

        let usage = raw.get("usage").map(|u| TokenUsage {
            prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
            completion_tokens: u
                .get("completion_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            total_tokens: u.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
        });
        if let Some(usage) = &usage {
            self.tokens_used
                .fetch_add(usage.total_tokens, Ordering::Relaxed);
        }

        let tool_calls = extract_tool_calls(message);
        let finish_reason = choice
            .get("finish_reason")
            .and_then(|v| v.as_str())
            .map(parse_finish_reason)
            .or(if tool_calls.is_empty() {
                Some(FinishReason::Stop)
            } else {
                Some(FinishReason::ToolCalls)
            });

        Ok(LlmResponse {
            content: extract_content(message.get("content")),
            tool_calls,
            usage,
            finish_reason,
            model: raw.get("model").and_then(|v| v.as_str()).map(String::from),
        })
    }

    async fn stream_complete(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<BoxStream<'static, Result<LlmChunk, LlmError>>, LlmError> {
        let body = self.request_body(messages, tools, true);
        let response = self.post_completions(&body).await?;

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<LlmChunk, LlmError>>(32);

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut assembler = ToolCallAssembler::default();
            let mut saw_tool_finish = false;

            'outer: while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(LlmError::Provider(format!("stream read failed: {e}"))))
                            .await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                // SSE events are separated by blank lines
                while let Some(pos) = buffer.find("\n\n") {
                    let event = buffer[..pos].to_string();
                    buffer.drain(..pos + 2);

                    for line in event.lines() {
                        let Some(data) = line.strip_prefix("data: ") else {
                            continue;
                        };
                        if data == "[DONE]" {
                            break 'outer;
                        }
                        let Ok(parsed) = serde_json::from_str::<Value>(data) else {
                            continue;
                        };
                        let model = parsed
                            .get("model")
                            .and_then(|v| v.as_str())
                            .map(String::from);
                        let Some(choice) = parsed
                            .get("choices")
                            .and_then(|c| c.as_array())
                            .and_then(|arr| arr.first())
                        else {
                            continue;
                        };

                        if let Some(delta) = choice.get("delta") {
                            if let Some(tc) = delta.get("tool_calls") {
                                assembler.absorb(tc);
                            }
                            if let Some(content) =
                                delta.get("content").and_then(|v| v.as_str())
                            {
                                if !content.is_empty()
                                    && tx
                                        .send(Ok(LlmChunk {
                                            content: content.to_string(),
                                            model: model.clone(),
                                            ..Default::default()
                                        }))
                                        .await
                                        .is_err()
                                {
                                    return;
                                }
                            }
                        }

                        match choice.get("finish_reason").and_then(|v| v.as_str()) {
                            Some("tool_calls") => {
                                saw_tool_finish = true;
                            }
                            Some(reason) => {
                                let _ = tx
                                    .send(Ok(LlmChunk {
                                        finish_reason: Some(parse_finish_reason(reason)),
                                        model,
                                        ..Default::default()
                                    }))
                                    .await;
                            }
                            None => {}
                        }
                    }
                }
            }

            // The final chunk of a tool-calling stream carries the
            // fully assembled call list
            if saw_tool_finish || !assembler.is_empty() {
                let _ = tx
                    .send(Ok(LlmChunk {
                        tool_calls: assembler.finish(),
                        finish_reason: Some(FinishReason::ToolCalls),
                        ..Default::default()
                    }))
                    .await;
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }

    fn total_tokens_used(&self) -> u64 {
        self.tokens_used.load(Ordering::Relaxed)
    }
}
