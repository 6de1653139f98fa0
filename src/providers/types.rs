//! Completion service types for ZeptoCord
//!
//! The completion service streams [`CompletionChunk`]s over a tokio mpsc
//! channel. Each chunk carries at most one choice delta: a content fragment,
//! indexed tool-call fragments, and possibly a finish reason.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::session::Message;

/// A tool advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

/// Sampling options for a completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl ChatOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Everything one streamed completion needs.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Full context: system prompt, history, this turn's messages
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub options: ChatOptions,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>, tools: Vec<ToolDefinition>) -> Self {
        Self {
            messages,
            tools,
            options: ChatOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }
}

/// Why the model stopped producing a choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    /// Anything the protocol does not define; ends the turn like `Stop`
    Other(String),
}

impl FinishReason {
    /// Parse the wire value (`"stop"`, `"tool_calls"`, ...).
    pub fn from_wire(value: &str) -> Self {
        match value {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            "tool_calls" => FinishReason::ToolCalls,
            other => FinishReason::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::Other(other) => other,
        }
    }
}

/// One indexed tool-call fragment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallDelta {
    /// Position of the call within the choice
    pub index: usize,
    pub id: Option<String>,
    pub kind: Option<String>,
    pub name: Option<String>,
    /// Argument fragment to append
    pub arguments: Option<String>,
}

/// Delta of the first choice in a chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChoiceDelta {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallDelta>,
    pub finish_reason: Option<FinishReason>,
}

/// One streamed event. `choice` is `None` for chunks with an empty
/// `choices` array (usage-only or keep-alive events).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionChunk {
    pub choice: Option<ChoiceDelta>,
}

impl CompletionChunk {
    /// A chunk with no choice at all.
    pub fn empty() -> Self {
        Self { choice: None }
    }

    /// A content fragment.
    pub fn content(text: &str) -> Self {
        Self {
            choice: Some(ChoiceDelta {
                content: Some(text.to_string()),
                ..Default::default()
            }),
        }
    }

    /// A bare finish signal.
    pub fn finish(reason: FinishReason) -> Self {
        Self {
            choice: Some(ChoiceDelta {
                finish_reason: Some(reason),
                ..Default::default()
            }),
        }
    }

    /// A tool-call fragment; `id` and `name` are only sent with the first one.
    pub fn tool_call(
        index: usize,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) -> Self {
        Self {
            choice: Some(ChoiceDelta {
                tool_calls: vec![ToolCallDelta {
                    index,
                    id: id.map(str::to_string),
                    kind: id.map(|_| "function".to_string()),
                    name: name.map(str::to_string),
                    arguments: arguments.map(str::to_string),
                }],
                ..Default::default()
            }),
        }
    }
}

/// Receiving end of a streamed completion. The sender closes when the
/// stream ends; an `Err` item is a transport failure.
pub type ChunkReceiver = mpsc::Receiver<Result<CompletionChunk>>;

/// A streaming chat completion service.
///
/// Constructed once by the process and shared by every turn.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Open a streamed completion.
    ///
    /// Errors here (HTTP status, connect failure) happen before any chunk.
    async fn stream(&self, request: CompletionRequest) -> Result<ChunkReceiver>;

    /// Model identifier used for requests.
    fn model(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_reason_wire() {
        assert_eq!(FinishReason::from_wire("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::from_wire("tool_calls"), FinishReason::ToolCalls);
        assert_eq!(
            FinishReason::from_wire("content_filter"),
            FinishReason::ContentFilter
        );
        let other = FinishReason::from_wire("function_call");
        assert_eq!(other, FinishReason::Other("function_call".into()));
        assert_eq!(other.as_str(), "function_call");
    }

    #[test]
    fn test_chunk_constructors() {
        let chunk = CompletionChunk::tool_call(1, Some("c1"), Some("math"), Some("{"));
        let delta = &chunk.choice.unwrap().tool_calls[0];
        assert_eq!(delta.index, 1);
        assert_eq!(delta.kind.as_deref(), Some("function"));

        let chunk = CompletionChunk::tool_call(1, None, None, Some("}"));
        let delta = &chunk.choice.unwrap().tool_calls[0];
        assert!(delta.id.is_none());
        assert!(delta.kind.is_none());
    }

    #[test]
    fn test_chat_options_builder() {
        let opts = ChatOptions::new().with_max_tokens(100).with_temperature(0.2);
        assert_eq!(opts.max_tokens, Some(100));
        assert_eq!(opts.temperature, Some(0.2));
    }
}
