//! Discord lookup and action tools.
//!
//! Every tool talks to Discord through the [`DiscordApi`] capability so the
//! tools stay testable without a network. Lookup failures are reported to the
//! model as tool errors ("User not found", ...); the underlying cause is only
//! logged.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::channels::DiscordApi;
use crate::error::{CordError, Result};

use super::{parse_args, to_value, Tool, ToolContext};

/// Log the cause and replace it with a model-facing message.
fn lookup_failed(message: &str, cause: CordError, details: Value) -> CordError {
    debug!(error = %cause, "Discord lookup failed");
    CordError::tool_with_details(message, details)
}

/// All Discord tools sharing one API handle.
pub fn discord_tools(api: Arc<dyn DiscordApi>) -> Vec<Box<dyn Tool>> {
    vec![
        Box::new(GetUserInfoTool::new(api.clone())),
        Box::new(GetChannelInfoTool::new(api.clone())),
        Box::new(GetGuildInfoTool::new(api.clone())),
        Box::new(GetMessageInfoTool::new(api.clone())),
        Box::new(GetVoiceStateTool::new(api.clone())),
        Box::new(SendEmbedTool::new(api.clone())),
        Box::new(ReactMessageTool::new(api.clone())),
        Box::new(RenameThreadTool::new(api)),
    ]
}

macro_rules! api_tool {
    ($name:ident) => {
        pub struct $name {
            api: Arc<dyn DiscordApi>,
        }

        impl $name {
            pub fn new(api: Arc<dyn DiscordApi>) -> Self {
                Self { api }
            }
        }
    };
}

api_tool!(GetUserInfoTool);
api_tool!(GetChannelInfoTool);
api_tool!(GetGuildInfoTool);
api_tool!(GetMessageInfoTool);
api_tool!(GetVoiceStateTool);
api_tool!(SendEmbedTool);
api_tool!(ReactMessageTool);
api_tool!(RenameThreadTool);

#[derive(Deserialize)]
struct UserArgs {
    user_id: String,
}

#[derive(Deserialize)]
struct ChannelArgs {
    channel_id: String,
}

#[derive(Deserialize)]
struct GuildArgs {
    guild_id: String,
}

#[derive(Deserialize)]
struct MessageArgs {
    message_id: String,
    channel_id: String,
}

#[derive(Deserialize)]
struct ReactArgs {
    message_id: String,
    emoji: String,
}

#[derive(Deserialize)]
struct RenameArgs {
    name: String,
}

fn id_schema(fields: &[&str]) -> Value {
    let properties: serde_json::Map<String, Value> = fields
        .iter()
        .map(|f| (f.to_string(), json!({"type": "string", "minLength": 1})))
        .collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": fields,
    })
}

#[async_trait]
impl Tool for GetUserInfoTool {
    fn name(&self) -> &str {
        "get_user_info"
    }

    fn description(&self) -> &str {
        "Returns information about a user. From Discord API."
    }

    fn parameters(&self) -> Value {
        id_schema(&["user_id"])
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value> {
        let args: UserArgs = parse_args(self.name(), args)?;
        self.api
            .get_user(&args.user_id)
            .await
            .map_err(|e| lookup_failed("User not found", e, json!({"user_id": args.user_id})))
    }
}

#[async_trait]
impl Tool for GetChannelInfoTool {
    fn name(&self) -> &str {
        "get_channel_info"
    }

    fn description(&self) -> &str {
        "Returns information about a channel. From Discord API."
    }

    fn parameters(&self) -> Value {
        id_schema(&["channel_id"])
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value> {
        let args: ChannelArgs = parse_args(self.name(), args)?;
        self.api.get_channel(&args.channel_id).await.map_err(|e| {
            lookup_failed("Channel not found", e, json!({"channel_id": args.channel_id}))
        })
    }
}

#[async_trait]
impl Tool for GetGuildInfoTool {
    fn name(&self) -> &str {
        "get_guild_info"
    }

    fn description(&self) -> &str {
        "Returns information about a guild. From Discord API."
    }

    fn parameters(&self) -> Value {
        id_schema(&["guild_id"])
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value> {
        let args: GuildArgs = parse_args(self.name(), args)?;
        self.api
            .get_guild(&args.guild_id)
            .await
            .map_err(|e| lookup_failed("Guild not found", e, json!({"guild_id": args.guild_id})))
    }
}

#[async_trait]
impl Tool for GetMessageInfoTool {
    fn name(&self) -> &str {
        "get_message_info"
    }

    fn description(&self) -> &str {
        "Returns information about a message. From Discord API."
    }

    fn parameters(&self) -> Value {
        id_schema(&["message_id", "channel_id"])
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value> {
        let args: MessageArgs = parse_args(self.name(), args)?;
        self.api
            .get_message(&args.channel_id, &args.message_id)
            .await
            .map_err(|e| {
                lookup_failed(
                    "Message not found",
                    e,
                    json!({"channel_id": args.channel_id, "message_id": args.message_id}),
                )
            })
    }
}

#[async_trait]
impl Tool for GetVoiceStateTool {
    fn name(&self) -> &str {
        "get_voice_state"
    }

    fn description(&self) -> &str {
        "Returns information about a voice state in current guild. From Discord API."
    }

    fn parameters(&self) -> Value {
        id_schema(&["user_id"])
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: UserArgs = parse_args(self.name(), args)?;
        let guild_id = ctx.require_guild()?;
        self.api
            .get_voice_state(guild_id, &args.user_id)
            .await
            .map_err(|e| {
                lookup_failed(
                    "User not in voice channel",
                    e,
                    json!({"user_id": args.user_id}),
                )
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedMedia {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedFooter {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedAuthor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

/// Rich embed accepted by `send_embed_message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<EmbedMedia>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<EmbedMedia>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<EmbedAuthor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
}

fn media_schema() -> Value {
    json!({
        "type": "object",
        "description": "leave undefined if you don't want to set",
        "properties": {
            "url": {"type": "string"},
            "height": {"type": "integer", "minimum": 1},
            "width": {"type": "integer", "minimum": 1}
        },
        "required": ["url"]
    })
}

#[async_trait]
impl Tool for SendEmbedTool {
    fn name(&self) -> &str {
        "send_embed_message"
    }

    fn description(&self) -> &str {
        "Sends an embed message to current channel. From Discord API."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string", "minLength": 1, "maxLength": 256},
                "description": {"type": "string", "minLength": 1, "maxLength": 4096},
                "url": {"type": "string"},
                "footer": {
                    "type": "object",
                    "properties": {
                        "text": {"type": "string", "minLength": 1, "maxLength": 2048},
                        "icon_url": {"type": "string"}
                    },
                    "required": ["text"]
                },
                "image": media_schema(),
                "thumbnail": media_schema(),
                "author": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string", "minLength": 1, "maxLength": 256},
                        "url": {"type": "string"},
                        "icon_url": {"type": "string"}
                    },
                    "required": ["name"]
                },
                "fields": {
                    "type": "array",
                    "maxItems": 25,
                    "description": "leave [] if you don't want to set",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": {"type": "string", "minLength": 1, "maxLength": 256},
                            "value": {"type": "string", "minLength": 1, "maxLength": 1024},
                            "inline": {"type": "boolean"}
                        },
                        "required": ["name", "value"]
                    }
                }
            },
            "required": ["title"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let embed: Embed = parse_args(self.name(), args)?;
        let channel_id = ctx.require_channel()?;
        let payload = to_value(&embed)?;
        self.api
            .send_embed(channel_id, &payload)
            .await
            .map_err(|e| lookup_failed("Failed to send message", e, json!({"title": embed.title})))
    }
}

#[async_trait]
impl Tool for ReactMessageTool {
    fn name(&self) -> &str {
        "react_message"
    }

    fn description(&self) -> &str {
        "Reacts to a message in the current channel. From Discord API."
    }

    fn parameters(&self) -> Value {
        id_schema(&["message_id", "emoji"])
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: ReactArgs = parse_args(self.name(), args)?;
        let channel_id = ctx.require_channel()?;
        self.api
            .add_reaction(channel_id, &args.message_id, &args.emoji)
            .await
            .map_err(|e| {
                lookup_failed(
                    "Failed to react to message",
                    e,
                    json!({"message_id": args.message_id, "emoji": args.emoji}),
                )
            })?;
        Ok(json!({"message_id": args.message_id, "emoji": args.emoji, "reacted": true}))
    }
}

#[async_trait]
impl Tool for RenameThreadTool {
    fn name(&self) -> &str {
        "rename_current_thread"
    }

    fn description(&self) -> &str {
        "Renames the current thread. From Discord API. Use this before the first response to rename the subject."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"name": {"type": "string", "minLength": 1, "maxLength": 100}},
            "required": ["name"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: RenameArgs = parse_args(self.name(), args)?;
        if !ctx.in_thread {
            return Err(CordError::tool("This command can only be used in threads."));
        }
        let channel_id = ctx.require_channel()?;
        self.api
            .rename_channel(channel_id, &args.name)
            .await
            .map_err(|e| lookup_failed("Failed to rename thread", e, json!({"name": args.name})))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeApi {
        calls: Mutex<Vec<String>>,
    }

    impl FakeApi {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl DiscordApi for FakeApi {
        async fn get_user(&self, user_id: &str) -> Result<Value> {
            if user_id == "1" {
                Ok(json!({"id": "1", "username": "alice"}))
            } else {
                Err(CordError::Channel("HTTP 404".into()))
            }
        }

        async fn get_channel(&self, channel_id: &str) -> Result<Value> {
            Ok(json!({"id": channel_id}))
        }

        async fn get_guild(&self, guild_id: &str) -> Result<Value> {
            Ok(json!({"id": guild_id}))
        }

        async fn get_message(&self, channel_id: &str, message_id: &str) -> Result<Value> {
            Ok(json!({"id": message_id, "channel_id": channel_id}))
        }

        async fn get_voice_state(&self, guild_id: &str, user_id: &str) -> Result<Value> {
            self.record(format!("voice {guild_id} {user_id}"));
            Err(CordError::Channel("HTTP 404".into()))
        }

        async fn send_embed(&self, channel_id: &str, embed: &Value) -> Result<Value> {
            self.record(format!("embed {channel_id} {}", embed["title"]));
            Ok(json!({"id": "m1", "embeds": [embed]}))
        }

        async fn add_reaction(&self, channel_id: &str, message_id: &str, emoji: &str) -> Result<()> {
            self.record(format!("react {channel_id} {message_id} {emoji}"));
            Ok(())
        }

        async fn rename_channel(&self, channel_id: &str, name: &str) -> Result<Value> {
            self.record(format!("rename {channel_id} {name}"));
            Ok(json!({"id": channel_id, "name": name}))
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::new()
            .with_guild("g1")
            .with_channel("t1")
            .with_user("u1", "alice")
    }

    #[tokio::test]
    async fn test_get_user_found_and_missing() {
        let tool = GetUserInfoTool::new(Arc::new(FakeApi::default()));
        let user = tool.execute(json!({"user_id": "1"}), &ctx()).await.unwrap();
        assert_eq!(user["username"], "alice");

        let err = tool.execute(json!({"user_id": "2"}), &ctx()).await.unwrap_err();
        match err {
            CordError::Tool { message, details } => {
                assert_eq!(message, "User not found");
                assert_eq!(details.unwrap()["user_id"], "2");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_voice_state_requires_guild() {
        let api = Arc::new(FakeApi::default());
        let tool = GetVoiceStateTool::new(api.clone());
        let err = tool
            .execute(json!({"user_id": "1"}), &ToolContext::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("guilds"));
        assert!(api.calls().is_empty());

        let err = tool.execute(json!({"user_id": "1"}), &ctx()).await.unwrap_err();
        assert!(err.to_string().contains("User not in voice channel"));
        assert_eq!(api.calls(), vec!["voice g1 1"]);
    }

    #[tokio::test]
    async fn test_send_embed_to_current_channel() {
        let api = Arc::new(FakeApi::default());
        let tool = SendEmbedTool::new(api.clone());
        let result = tool
            .execute(
                json!({"title": "Hello", "fields": [{"name": "a", "value": "b"}]}),
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(result["id"], "m1");
        assert_eq!(result["embeds"][0]["fields"][0]["inline"], false);
        assert!(result["embeds"][0].get("description").is_none());
        assert_eq!(api.calls(), vec![r#"embed t1 "Hello""#]);
    }

    #[tokio::test]
    async fn test_react_message() {
        let api = Arc::new(FakeApi::default());
        let tool = ReactMessageTool::new(api.clone());
        let result = tool
            .execute(json!({"message_id": "m9", "emoji": "👍"}), &ctx())
            .await
            .unwrap();
        assert_eq!(result["reacted"], true);
        assert_eq!(api.calls(), vec!["react t1 m9 👍"]);
    }

    #[tokio::test]
    async fn test_rename_only_in_threads() {
        let api = Arc::new(FakeApi::default());
        let tool = RenameThreadTool::new(api.clone());
        let err = tool.execute(json!({"name": "Topic"}), &ctx()).await.unwrap_err();
        assert!(err.to_string().contains("threads"));

        let result = tool
            .execute(json!({"name": "Topic"}), &ctx().in_thread(true))
            .await
            .unwrap();
        assert_eq!(result["name"], "Topic");
        assert_eq!(api.calls(), vec!["rename t1 Topic"]);
    }

    #[test]
    fn test_discord_tools_names() {
        let tools = discord_tools(Arc::new(FakeApi::default()));
        let names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
        assert_eq!(names.len(), 8);
        assert!(names.contains(&"send_embed_message"));
        assert!(names.contains(&"rename_current_thread"));
    }
}
