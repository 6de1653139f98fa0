//! OpenAI-compatible streaming completion client
//!
//! Works against OpenAI, Azure OpenAI and any server speaking the Chat
//! Completions SSE protocol. When an API version is configured it is sent as
//! the `api-version` query parameter and the key is duplicated into the
//! `api-key` header, which Azure deployments require.
//!
//! # Example
//!
//! ```rust,ignore
//! use zeptocord::providers::{CompletionClient, CompletionRequest, OpenAiCompatClient};
//! use zeptocord::session::Message;
//!
//! async fn example() {
//!     let client = OpenAiCompatClient::new("https://api.openai.com/v1", "sk-...", "gpt-4o");
//!     let mut rx = client
//!         .stream(CompletionRequest::new(vec![Message::user("Hello!")], vec![]))
//!         .await
//!         .unwrap();
//!     while let Some(chunk) = rx.recv().await {
//!         println!("{:?}", chunk);
//!     }
//! }
//! ```

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::error::{CordError, ProviderError, Result};
use crate::session::Message;
use crate::utils::string::preview;

use super::{
    ChoiceDelta, ChunkReceiver, CompletionChunk, CompletionClient, CompletionRequest,
    FinishReason, ToolCallDelta, ToolDefinition,
};

/// Buffered chunks between the reader task and the turn.
const CHUNK_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    r#type: &'static str,
    function: &'a ToolDefinition,
}

// ============================================================================
// Stream Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct WireChunk {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    #[serde(default)]
    delta: WireDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    r#type: Option<String>,
    #[serde(default)]
    function: Option<WireFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct WireFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

impl From<WireChunk> for CompletionChunk {
    fn from(wire: WireChunk) -> Self {
        let choice = wire.choices.into_iter().next().map(|choice| ChoiceDelta {
            content: choice.delta.content,
            tool_calls: choice
                .delta
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|tc| {
                    let (name, arguments) = match tc.function {
                        Some(f) => (f.name, f.arguments),
                        None => (None, None),
                    };
                    ToolCallDelta {
                        index: tc.index,
                        id: tc.id,
                        kind: tc.r#type,
                        name,
                        arguments,
                    }
                })
                .collect(),
            finish_reason: choice.finish_reason.as_deref().map(FinishReason::from_wire),
        });
        CompletionChunk { choice }
    }
}

/// Parse one SSE `data:` payload.
pub fn parse_chunk(data: &str) -> Result<CompletionChunk> {
    let wire: WireChunk = serde_json::from_str(data)?;
    Ok(wire.into())
}

// ============================================================================
// SSE Line Buffer
// ============================================================================

/// An event extracted from the SSE byte stream.
#[derive(Debug, PartialEq)]
pub enum SseEvent {
    Data(String),
    Done,
}

/// Reassembles `data:` lines from arbitrarily split byte chunks.
///
/// Bytes are kept until a full line arrives, so a multi-byte character
/// split across chunks is decoded intact.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return every complete event they finish.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim();
            let data = match line
                .strip_prefix("data: ")
                .or_else(|| line.strip_prefix("data:"))
            {
                Some(data) => data.trim(),
                None => continue,
            };
            if data == "[DONE]" {
                events.push(SseEvent::Done);
            } else if !data.is_empty() {
                events.push(SseEvent::Data(data.to_string()));
            }
        }
        events
    }
}

// ============================================================================
// Client
// ============================================================================

/// Streaming client for OpenAI-compatible Chat Completions endpoints.
pub struct OpenAiCompatClient {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
    api_version: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl OpenAiCompatClient {
    pub fn new(api_base: &str, api_key: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            api_version: None,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Build from a validated provider config.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let required = |value: &Option<String>, name: &str| {
            value
                .as_deref()
                .filter(|v| !v.trim().is_empty())
                .map(str::to_string)
                .ok_or_else(|| CordError::Config(format!("missing provider.{}", name)))
        };
        let mut client = Self::new(
            &required(&config.api_base, "api_base")?,
            &required(&config.api_key, "api_key")?,
            &required(&config.model, "model")?,
        );
        client.api_version = config.api_version.clone();
        client.temperature = config.temperature;
        client.max_tokens = config.max_tokens;
        Ok(client)
    }

    /// Send the `api-version` query parameter (builder pattern).
    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompatClient {
    async fn stream(&self, request: CompletionRequest) -> Result<ChunkReceiver> {
        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            tools: request
                .tools
                .iter()
                .map(|function| WireTool {
                    r#type: "function",
                    function,
                })
                .collect(),
            stream: true,
            max_tokens: request.options.max_tokens.or(self.max_tokens),
            temperature: request.options.temperature.or(self.temperature),
        };

        let mut builder = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body);
        if let Some(version) = &self.api_version {
            builder = builder
                .query(&[("api-version", version.as_str())])
                .header("api-key", &self.api_key);
        }

        debug!(
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Opening completion stream"
        );
        let response = builder.send().await.map_err(|e| {
            CordError::Transport(format!("completion request failed: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &preview(&text, 500)).into());
        }

        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let bytes = response.bytes_stream();

        tokio::spawn(async move {
            tokio::pin!(bytes);
            let mut lines = SseLineBuffer::new();
            while let Some(next) = bytes.next().await {
                let chunk = match next {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx
                            .send(Err(CordError::Transport(format!(
                                "stream read error: {}",
                                e
                            ))))
                            .await;
                        return;
                    }
                };
                for event in lines.push(&chunk) {
                    match event {
                        SseEvent::Done => return,
                        SseEvent::Data(data) => match parse_chunk(&data) {
                            Ok(parsed) => {
                                if tx.send(Ok(parsed)).await.is_err() {
                                    // Receiver dropped; the turn stopped reading.
                                    return;
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, data = %preview(&data, 200), "Skipping unparsable stream event");
                            }
                        },
                    }
                }
            }
        });

        Ok(rx)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ToolCall;
    use serde_json::json;

    #[test]
    fn test_line_buffer_split_across_pushes() {
        let mut buf = SseLineBuffer::new();
        assert!(buf.push(b"data: {\"a\"").is_empty());
        assert_eq!(
            buf.push(b":1}\n\ndata: [DONE]\n"),
            vec![SseEvent::Data("{\"a\":1}".into()), SseEvent::Done]
        );
    }

    #[test]
    fn test_line_buffer_keeps_multibyte_char_split_across_pushes() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"Xin chào\"}}]}\n".as_bytes();
        let split = line.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut buf = SseLineBuffer::new();
        assert!(buf.push(&line[..split]).is_empty());
        let events = buf.push(&line[split..]);
        let SseEvent::Data(data) = &events[0] else {
            panic!("expected data event, got {:?}", events);
        };
        let chunk = parse_chunk(data).unwrap();
        assert_eq!(chunk.choice.unwrap().content.as_deref(), Some("Xin chào"));
    }

    #[test]
    fn test_line_buffer_ignores_comments_and_events() {
        let mut buf = SseLineBuffer::new();
        let events = buf.push(b": keep-alive\nevent: ping\ndata:{}\n");
        assert_eq!(events, vec![SseEvent::Data("{}".into())]);
    }

    #[test]
    fn test_parse_content_chunk() {
        let chunk =
            parse_chunk(r#"{"choices":[{"index":0,"delta":{"content":"Hel"},"finish_reason":null}]}"#)
                .unwrap();
        let choice = chunk.choice.unwrap();
        assert_eq!(choice.content.as_deref(), Some("Hel"));
        assert!(choice.finish_reason.is_none());
    }

    #[test]
    fn test_parse_tool_call_chunk() {
        let chunk = parse_chunk(
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"execute_math_expression","arguments":""}}]}}]}"#,
        )
        .unwrap();
        let delta = &chunk.choice.unwrap().tool_calls[0];
        assert_eq!(delta.id.as_deref(), Some("call_1"));
        assert_eq!(delta.name.as_deref(), Some("execute_math_expression"));
        assert_eq!(delta.arguments.as_deref(), Some(""));
    }

    #[test]
    fn test_parse_empty_choices() {
        let chunk = parse_chunk(r#"{"choices":[],"usage":{"total_tokens":3}}"#).unwrap();
        assert!(chunk.choice.is_none());
    }

    #[test]
    fn test_parse_finish_reason() {
        let chunk =
            parse_chunk(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#).unwrap();
        assert_eq!(
            chunk.choice.unwrap().finish_reason,
            Some(FinishReason::ToolCalls)
        );
    }

    #[test]
    fn test_request_body_shape() {
        let messages = vec![
            Message::system("sys"),
            Message::assistant_with_tools("", vec![ToolCall::new("c1", "t", "{}")]),
            Message::tool_result("c1", "{}"),
        ];
        let def = ToolDefinition::new("t", "test", json!({"type": "object"}));
        let body = ChatRequest {
            model: "m",
            messages: &messages,
            tools: vec![WireTool {
                r#type: "function",
                function: &def,
            }],
            stream: true,
            max_tokens: None,
            temperature: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["tools"][0]["type"], "function");
        assert_eq!(json["tools"][0]["function"]["name"], "t");
        assert_eq!(json["messages"][1]["tool_calls"][0]["id"], "c1");
        assert_eq!(json["messages"][2]["tool_call_id"], "c1");
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn test_from_config_requires_fields() {
        let config = ProviderConfig::default();
        assert!(matches!(
            OpenAiCompatClient::from_config(&config),
            Err(CordError::Config(_))
        ));

        let config = ProviderConfig {
            api_base: Some("https://example.test/v1/".into()),
            api_key: Some("k".into()),
            model: Some("gpt-4o".into()),
            ..Default::default()
        };
        let client = OpenAiCompatClient::from_config(&config).unwrap();
        assert_eq!(client.endpoint(), "https://example.test/v1/chat/completions");
        assert_eq!(client.model(), "gpt-4o");
    }
}
