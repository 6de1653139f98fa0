//! Message types for the ZeptoCord message bus
//!
//! An [`InboundMessage`] is one user message that addressed the bot, carrying
//! everything a turn needs to pick its conversation and reply in place.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Source channel name (e.g. "discord")
    pub channel: String,
    pub sender_id: String,
    pub sender_name: String,
    /// Channel or thread the message was posted in
    pub chat_id: String,
    pub message_id: String,
    /// `None` for direct messages
    pub guild_id: Option<String>,
    pub content: String,
    /// Guild preferred locale, e.g. "en-US"
    pub locale: Option<String>,
    /// Raw platform payload, shown to the model as context
    #[serde(default)]
    pub raw: Option<serde_json::Value>,
}

impl InboundMessage {
    pub fn new(channel: &str, sender_id: &str, chat_id: &str, content: &str) -> Self {
        Self {
            channel: channel.to_string(),
            sender_id: sender_id.to_string(),
            sender_name: sender_id.to_string(),
            chat_id: chat_id.to_string(),
            message_id: String::new(),
            guild_id: None,
            content: content.to_string(),
            locale: None,
            raw: None,
        }
    }

    pub fn with_sender_name(mut self, name: &str) -> Self {
        self.sender_name = name.to_string();
        self
    }

    pub fn with_message_id(mut self, message_id: &str) -> Self {
        self.message_id = message_id.to_string();
        self
    }

    pub fn with_guild(mut self, guild_id: &str) -> Self {
        self.guild_id = Some(guild_id.to_string());
        self
    }

    pub fn with_locale(mut self, locale: &str) -> Self {
        self.locale = Some(locale.to_string());
        self
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }

    /// Name attached to the user message: `<username>-<user id>`.
    pub fn author_tag(&self) -> String {
        format!("{}-{}", self.sender_name, self.sender_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_message_builder() {
        let msg = InboundMessage::new("discord", "42", "c1", "hi")
            .with_sender_name("alice")
            .with_message_id("m1")
            .with_guild("g1")
            .with_locale("vi");

        assert_eq!(msg.channel, "discord");
        assert_eq!(msg.message_id, "m1");
        assert_eq!(msg.guild_id.as_deref(), Some("g1"));
        assert_eq!(msg.locale.as_deref(), Some("vi"));
        assert!(msg.raw.is_none());
    }

    #[test]
    fn test_author_tag() {
        let msg = InboundMessage::new("discord", "42", "c1", "hi").with_sender_name("alice");
        assert_eq!(msg.author_tag(), "alice-42");
    }

    #[test]
    fn test_inbound_message_serde() {
        let msg = InboundMessage::new("discord", "42", "c1", "hi");
        let json = serde_json::to_string(&msg).unwrap();
        let back: InboundMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
