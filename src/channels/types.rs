//! Channel traits and types for ZeptoCord
//!
//! Three capabilities meet here:
//! - [`Channel`]: lifecycle of an inbound transport (gateway connection)
//! - [`MessageChannel`] / [`ReplyHandle`]: sending and editing the reply
//!   fragments of one turn
//! - [`ConversationOpener`]: resolving which conversation an inbound
//!   message belongs to, creating a thread if needed

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::bus::InboundMessage;
use crate::error::Result;

/// Lifecycle of an inbound transport.
///
/// Channels receive messages from users and publish them to the message
/// bus. Replies are sent through [`MessageChannel`]s, not through this trait.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique name of this channel (e.g. "discord").
    fn name(&self) -> &str;

    /// Connect and start publishing inbound messages.
    async fn start(&mut self) -> Result<()>;

    /// Disconnect and stop publishing.
    async fn stop(&mut self) -> Result<()>;

    fn is_running(&self) -> bool;

    /// Whether a user may talk to the bot through this channel.
    fn is_allowed(&self, user_id: &str) -> bool;
}

/// Base configuration shared by all channels.
///
/// # Example
///
/// ```
/// use zeptocord::channels::BaseChannelConfig;
///
/// let config = BaseChannelConfig::with_allowlist("discord", vec!["user123".to_string()]);
/// assert!(config.is_allowed("user123"));
/// assert!(!config.is_allowed("user789"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct BaseChannelConfig {
    pub name: String,
    /// Allowed user ids. Empty allows everyone.
    pub allowlist: Vec<String>,
}

impl BaseChannelConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            allowlist: Vec::new(),
        }
    }

    pub fn with_allowlist(name: &str, allowlist: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            allowlist,
        }
    }

    pub fn is_allowed(&self, user_id: &str) -> bool {
        self.allowlist.is_empty() || self.allowlist.iter().any(|id| id == user_id)
    }
}

/// A message the bot posted and may still edit or delete.
#[async_trait]
pub trait ReplyHandle: Send + Sync {
    /// Platform message id.
    fn id(&self) -> &str;

    async fn edit(&self, text: &str) -> Result<()>;

    async fn delete(&self) -> Result<()>;
}

/// Where one turn's replies go.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Post a new message and return a handle to it.
    async fn send(&self, text: &str) -> Result<Arc<dyn ReplyHandle>>;
}

/// The conversation an inbound message was routed to.
pub struct OpenedConversation {
    /// Conversation id (the thread id on Discord)
    pub conversation_id: String,
    /// Whether the conversation lives in a thread
    pub in_thread: bool,
    /// Reply target for this turn
    pub channel: Arc<dyn MessageChannel>,
}

/// Routes an inbound message to its conversation.
#[async_trait]
pub trait ConversationOpener: Send + Sync {
    /// `Ok(None)` means the message was answered with a notice and no turn
    /// should run.
    async fn open(&self, msg: &InboundMessage) -> Result<Option<OpenedConversation>>;
}

/// Discord REST lookups and actions used by the Discord tools.
///
/// Lookups return the raw API object.
#[async_trait]
pub trait DiscordApi: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<Value>;

    async fn get_channel(&self, channel_id: &str) -> Result<Value>;

    async fn get_guild(&self, guild_id: &str) -> Result<Value>;

    async fn get_message(&self, channel_id: &str, message_id: &str) -> Result<Value>;

    async fn get_voice_state(&self, guild_id: &str, user_id: &str) -> Result<Value>;

    async fn send_embed(&self, channel_id: &str, embed: &Value) -> Result<Value>;

    async fn add_reaction(&self, channel_id: &str, message_id: &str, emoji: &str) -> Result<()>;

    async fn rename_channel(&self, channel_id: &str, name: &str) -> Result<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_channel_config_new() {
        let config = BaseChannelConfig::new("discord");
        assert_eq!(config.name, "discord");
        assert!(config.is_allowed("anyone"));
    }

    #[test]
    fn test_allowlist() {
        let config = BaseChannelConfig::with_allowlist(
            "discord",
            vec!["user1".to_string(), "user2".to_string()],
        );
        assert!(config.is_allowed("user1"));
        assert!(config.is_allowed("user2"));
        assert!(!config.is_allowed("user3"));
    }

    #[test]
    fn test_default_allows_everyone() {
        let config = BaseChannelConfig::default();
        assert!(config.name.is_empty());
        assert!(config.is_allowed("anyone"));
    }
}
