//! Tool types for ZeptoCord
//!
//! A tool is a named capability with a JSON Schema for its arguments and an
//! async handler. Handlers return any JSON value; failures are reported as
//! `CordError::Tool` (optionally with structured details) and become data
//! for the model rather than aborting the turn.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::{CordError, Result};
use crate::session::Message;

/// The trait every tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the model calls the tool by.
    fn name(&self) -> &str;

    /// Description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema for the arguments object.
    fn parameters(&self) -> Value;

    /// Run with arguments that already passed schema validation.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Who and where a tool call comes from.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Guild of the triggering message, `None` in DMs
    pub guild_id: Option<String>,
    /// Channel (or thread) the conversation lives in
    pub channel_id: Option<String>,
    /// Triggering message
    pub message_id: Option<String>,
    /// Requesting user
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    /// Whether `channel_id` is a thread
    pub in_thread: bool,
}

impl ToolContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_guild(mut self, guild_id: &str) -> Self {
        self.guild_id = Some(guild_id.to_string());
        self
    }

    pub fn with_channel(mut self, channel_id: &str) -> Self {
        self.channel_id = Some(channel_id.to_string());
        self
    }

    pub fn with_message(mut self, message_id: &str) -> Self {
        self.message_id = Some(message_id.to_string());
        self
    }

    pub fn with_user(mut self, user_id: &str, user_name: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self.user_name = Some(user_name.to_string());
        self
    }

    pub fn in_thread(mut self, in_thread: bool) -> Self {
        self.in_thread = in_thread;
        self
    }

    /// The guild id or a tool error naming the requirement.
    pub fn require_guild(&self) -> Result<&str> {
        self.guild_id
            .as_deref()
            .ok_or_else(|| CordError::tool("This command can only be used in guilds."))
    }

    /// The channel id or a tool error naming the requirement.
    pub fn require_channel(&self) -> Result<&str> {
        self.channel_id
            .as_deref()
            .ok_or_else(|| CordError::tool("This command can only be used in channels."))
    }
}

/// Deserialize validated arguments into a typed struct.
pub fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| CordError::ToolValidation {
        tool: tool.to_string(),
        message: e.to_string(),
    })
}

/// Serialize a handler's typed output.
pub fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Category of a per-call failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolFailureKind {
    NotFound,
    Validation,
    Handler,
}

impl ToolFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolFailureKind::NotFound => "tool_not_found",
            ToolFailureKind::Validation => "validation_error",
            ToolFailureKind::Handler => "tool_error",
        }
    }
}

/// A failed call, reported back to the model as JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolFailure {
    pub kind: ToolFailureKind,
    pub message: String,
    pub details: Option<Value>,
}

impl ToolFailure {
    pub fn new(kind: ToolFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    /// Convert a handler error, keeping structured fields.
    pub fn from_error(err: CordError) -> Self {
        match err {
            CordError::Tool { message, details } => Self {
                kind: ToolFailureKind::Handler,
                message,
                details,
            },
            CordError::ToolValidation { message, .. } => {
                Self::new(ToolFailureKind::Validation, message)
            }
            CordError::ToolNotFound(name) => {
                Self::new(ToolFailureKind::NotFound, format!("Tool not found: {}", name))
            }
            other => Self::new(ToolFailureKind::Handler, other.to_string()),
        }
    }

    /// `{"error": kind, "message": ..., <detail fields>}`.
    ///
    /// Object details are merged; any other detail value goes under `details`.
    pub fn payload(&self) -> Value {
        let mut map = Map::new();
        if let Some(details) = &self.details {
            match details {
                Value::Object(fields) => map.extend(fields.clone()),
                other => {
                    map.insert("details".to_string(), other.clone());
                }
            }
        }
        map.insert("error".to_string(), json!(self.kind.as_str()));
        map.insert("message".to_string(), json!(self.message));
        Value::Object(map)
    }
}

/// Result of one call, carrying the originating call id.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub outcome: std::result::Result<Value, ToolFailure>,
}

impl ToolResult {
    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    /// JSON text placed in the tool message.
    pub fn content(&self) -> String {
        let value = match &self.outcome {
            Ok(value) => value.clone(),
            Err(failure) => failure.payload(),
        };
        value.to_string()
    }

    /// The tool message answering this call.
    pub fn to_message(&self) -> Message {
        Message::tool_result(&self.call_id, &self.content())
    }
}
