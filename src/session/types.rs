//! Conversation types for ZeptoCord
//!
//! Messages use the OpenAI chat wire shape so a persisted record can be sent
//! back to the completion service without conversion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted state for one conversation (one Discord thread).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    /// Clean user/assistant history from completed turns
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Single-flight flag; true while a turn is running
    #[serde(default)]
    pub loading: bool,
    /// Requester that owns this conversation
    #[serde(default)]
    pub request_user_id: String,
    /// When `loading` was last set, used for the lock lease
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loading_since: Option<DateTime<Utc>>,
}

impl ConversationRecord {
    /// A fresh, unlocked record owned by `owner_id`.
    pub fn new(owner_id: &str) -> Self {
        Self {
            messages: Vec::new(),
            loading: false,
            request_user_id: owner_id.to_string(),
            loading_since: None,
        }
    }
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// Text content; empty for assistant messages that only carry tool calls
    #[serde(default)]
    pub content: String,
    /// Speaker label for user messages (`<username>-<id>`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Tool calls requested by the assistant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Call id this tool message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn with_role(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: &str) -> Self {
        Self::with_role(Role::System, content)
    }

    pub fn user(content: &str) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: &str) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Assistant message carrying the raw tool calls of one round.
    pub fn assistant_with_tools(content: &str, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(tool_calls),
            ..Self::with_role(Role::Assistant, content)
        }
    }

    /// Tool result message answering exactly one call.
    pub fn tool_result(tool_call_id: &str, content: &str) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.to_string()),
            ..Self::with_role(Role::Tool, content)
        }
    }

    /// Set the speaker label (builder pattern).
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// True for tool results and assistant messages that carry tool calls.
    pub fn is_tool_exchange(&self) -> bool {
        self.role == Role::Tool
            || (self.role == Role::Assistant && self.tool_calls.is_some())
    }
}

/// Role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call as sent by the model, OpenAI wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_call_type")]
    pub kind: String,
    pub function: FunctionCall,
}

fn default_call_type() -> String {
    "function".to_string()
}

/// Function name and JSON-encoded arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: &str, name: &str, arguments: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: default_call_type(),
            function: FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    pub fn arguments(&self) -> &str {
        &self.function.arguments
    }
}

/// Drop tool exchanges, leaving a clean user/assistant alternation.
pub fn strip_tool_exchanges(messages: Vec<Message>) -> Vec<Message> {
    messages
        .into_iter()
        .filter(|m| !m.is_tool_exchange())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_wire_shape() {
        let record = ConversationRecord::new("42");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["requestUserId"], "42");
        assert_eq!(json["loading"], false);
        assert!(json.get("loadingSince").is_none());
    }

    #[test]
    fn test_record_tolerates_missing_fields() {
        let record: ConversationRecord = serde_json::from_str(r#"{"loading":true}"#).unwrap();
        assert!(record.loading);
        assert!(record.messages.is_empty());
        assert!(record.request_user_id.is_empty());
    }

    #[test]
    fn test_tool_call_serializes_type() {
        let call = ToolCall::new("c1", "execute_math_expression", r#"{"expression":"2+2"}"#);
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "execute_math_expression");
    }

    #[test]
    fn test_user_message_with_name() {
        let msg = Message::user("hi").with_name("alice-1");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["name"], "alice-1");
        assert!(json.get("tool_calls").is_none());
    }

    #[test]
    fn test_strip_tool_exchanges() {
        let history = vec![
            Message::user("2+2?"),
            Message::assistant_with_tools("", vec![ToolCall::new("c1", "math", "{}")]),
            Message::tool_result("c1", r#"{"result":"4"}"#),
            Message::assistant("4"),
        ];
        let clean = strip_tool_exchanges(history);
        assert_eq!(clean.len(), 2);
        assert_eq!(clean[0].role, Role::User);
        assert_eq!(clean[1].content, "4");
    }
}
