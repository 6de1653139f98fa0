//! Music tools over the playback capability.
//!
//! Control commands share one guard: the call must come from a guild
//! channel, the requester must sit in a voice channel, and, unless forced,
//! it must be the bot's voice channel.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::channels::{LoopMode, PlaybackManager, PlaybackSession};
use crate::error::{CordError, Result};

use super::{parse_args, to_value, Tool, ToolContext};

const NOTHING_PLAYING: &str = "There is no song currently playing.";

/// All chat-facing music tools.
pub fn music_tools(manager: Arc<dyn PlaybackManager>) -> Vec<Box<dyn Tool>> {
    let mut tools: Vec<Box<dyn Tool>> = vec![
        Box::new(SearchMusicTool::new(manager.clone())),
        Box::new(PlayTool::new(manager.clone())),
    ];
    for command in SessionCommand::ALL {
        tools.push(Box::new(SessionCommandTool::new(command, manager.clone())));
    }
    tools
}

/// Requester's voice channel, after the guild and channel checks.
async fn requester_voice(manager: &dyn PlaybackManager, ctx: &ToolContext) -> Result<String> {
    let guild_id = ctx.require_guild()?;
    ctx.require_channel()?;
    let user_id = ctx
        .user_id
        .as_deref()
        .ok_or_else(|| CordError::tool("You need to be in a voice channel to use this command."))?;
    manager
        .voice_channel_of(guild_id, user_id)
        .await?
        .ok_or_else(|| CordError::tool("You need to be in a voice channel to use this command."))
}

fn same_channel_required() -> CordError {
    CordError::tool("You need to be in the same voice channel as the bot to use this command.")
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

pub struct SearchMusicTool {
    manager: Arc<dyn PlaybackManager>,
}

impl SearchMusicTool {
    pub fn new(manager: Arc<dyn PlaybackManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for SearchMusicTool {
    fn name(&self) -> &str {
        "search_music"
    }

    fn description(&self) -> &str {
        "Return the list of music that match the query. Return empty array if not found."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "minLength": 1},
                "limit": {"type": "integer", "minimum": 1, "maximum": 100, "default": 10}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: SearchArgs = parse_args(self.name(), args)?;
        let mut result = self
            .manager
            .search(&args.query, ctx.user_id.as_deref())
            .await?;
        if result.is_playlist() {
            return to_value(&result);
        }
        result.tracks.truncate(args.limit.unwrap_or(10));
        to_value(&result.tracks)
    }
}

#[derive(Deserialize)]
struct PlayArgs {
    query: String,
    #[serde(default)]
    force: Option<bool>,
}

pub struct PlayTool {
    manager: Arc<dyn PlaybackManager>,
}

impl PlayTool {
    pub fn new(manager: Arc<dyn PlaybackManager>) -> Self {
        Self { manager }
    }

    /// Existing session in the requester's channel, or a fresh one.
    async fn session_for(
        &self,
        guild_id: &str,
        text_channel_id: &str,
        voice_channel_id: &str,
        force: bool,
    ) -> Result<Arc<dyn PlaybackSession>> {
        if let Some(session) = self.manager.session(guild_id).await {
            let state = session.state().await?;
            match state.voice_channel_id.as_deref() {
                Some(bot_channel) if bot_channel != voice_channel_id => {
                    if !force {
                        return Err(same_channel_required());
                    }
                    session.destroy().await?;
                }
                _ => return Ok(session),
            }
        }
        self.manager
            .create_session(guild_id, text_channel_id, voice_channel_id)
            .await
    }
}

#[async_trait]
impl Tool for PlayTool {
    fn name(&self) -> &str {
        "play"
    }

    fn description(&self) -> &str {
        "Play a song or playlist in current user voice channel. You can use this tool to add songs to the queue."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "minLength": 1},
                "force": {
                    "type": "boolean",
                    "description": "If the bot is playing in another voice channel, stop there and play in the user's voice channel"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: PlayArgs = parse_args(self.name(), args)?;
        let voice_channel_id = requester_voice(self.manager.as_ref(), ctx).await?;
        let guild_id = ctx.require_guild()?;
        let text_channel_id = ctx.require_channel()?;

        let result = self
            .manager
            .search(&args.query, ctx.user_id.as_deref())
            .await?;
        let Some(first) = result.tracks.first().cloned() else {
            return Err(CordError::tool_with_details(
                "No results found.",
                json!({"query": args.query}),
            ));
        };

        let session = self
            .session_for(
                guild_id,
                text_channel_id,
                &voice_channel_id,
                args.force.unwrap_or(false),
            )
            .await?;

        if result.is_playlist() {
            session.enqueue(result.tracks).await?;
        } else {
            session.enqueue(vec![first.clone()]).await?;
        }

        let state = session.state().await?;
        if !state.playing && !state.paused {
            session.play().await?;
        }

        let message = format!("Now playing: {} - {}", first.title, first.author);
        Ok(json!({
            "success": true,
            "message": message,
            "metadata": first,
        }))
    }
}

/// Commands that act on an existing guild session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    ToggleAutoplay,
    SetLoopState,
    GetLoopState,
    NowPlaying,
    Pause,
    Resume,
    Skip,
    Stop,
    Queue,
}

impl SessionCommand {
    pub const ALL: [SessionCommand; 9] = [
        SessionCommand::ToggleAutoplay,
        SessionCommand::SetLoopState,
        SessionCommand::GetLoopState,
        SessionCommand::NowPlaying,
        SessionCommand::Pause,
        SessionCommand::Resume,
        SessionCommand::Skip,
        SessionCommand::Stop,
        SessionCommand::Queue,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SessionCommand::ToggleAutoplay => "toggle_autoplay",
            SessionCommand::SetLoopState => "set_loop_state",
            SessionCommand::GetLoopState => "get_loop_state",
            SessionCommand::NowPlaying => "now_playing",
            SessionCommand::Pause => "pause",
            SessionCommand::Resume => "resume",
            SessionCommand::Skip => "skip",
            SessionCommand::Stop => "stop",
            SessionCommand::Queue => "queue",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            SessionCommand::ToggleAutoplay => {
                "Toggle autoplay. Autoplay does not run while a loop is active."
            }
            SessionCommand::SetLoopState => "Set loop state.",
            SessionCommand::GetLoopState => "Get loop state.",
            SessionCommand::NowPlaying => "Get now playing song.",
            SessionCommand::Pause => "Pause the music.",
            SessionCommand::Resume => "Resume the music.",
            SessionCommand::Skip => "Skip the music.",
            SessionCommand::Stop => "Stop the music.",
            SessionCommand::Queue => "Get queue.",
        }
    }

    /// `get_loop_state` only needs a connected player.
    fn needs_voice(&self) -> bool {
        !matches!(self, SessionCommand::GetLoopState)
    }
}

#[derive(Deserialize)]
struct LoopArgs {
    #[serde(rename = "loop")]
    mode: LoopMode,
}

/// One of the [`SessionCommand`]s.
pub struct SessionCommandTool {
    command: SessionCommand,
    manager: Arc<dyn PlaybackManager>,
}

impl SessionCommandTool {
    pub fn new(command: SessionCommand, manager: Arc<dyn PlaybackManager>) -> Self {
        Self { command, manager }
    }

    async fn session(&self, ctx: &ToolContext) -> Result<Arc<dyn PlaybackSession>> {
        if !self.command.needs_voice() {
            let guild_id = ctx.require_guild()?;
            ctx.require_channel()?;
            return self.manager.session(guild_id).await.ok_or_else(|| {
                CordError::tool(
                    "There is no song currently playing. Or bot is not connected to a voice channel",
                )
            });
        }

        let voice_channel_id = requester_voice(self.manager.as_ref(), ctx).await?;
        let guild_id = ctx.require_guild()?;
        let session = self
            .manager
            .session(guild_id)
            .await
            .ok_or_else(|| CordError::tool(NOTHING_PLAYING))?;
        let state = session.state().await?;
        if state.current.is_none() {
            return Err(CordError::tool(NOTHING_PLAYING));
        }
        if state
            .voice_channel_id
            .as_deref()
            .is_some_and(|bot| bot != voice_channel_id)
        {
            return Err(same_channel_required());
        }
        Ok(session)
    }
}

#[async_trait]
impl Tool for SessionCommandTool {
    fn name(&self) -> &str {
        self.command.name()
    }

    fn description(&self) -> &str {
        self.command.description()
    }

    fn parameters(&self) -> Value {
        match self.command {
            SessionCommand::SetLoopState => json!({
                "type": "object",
                "properties": {
                    "loop": {"type": "string", "enum": ["none", "queue", "track"]}
                },
                "required": ["loop"]
            }),
            _ => json!({"type": "object", "properties": {}}),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let session = self.session(ctx).await?;

        match self.command {
            SessionCommand::ToggleAutoplay => {
                let enabled = !session.state().await?.autoplay;
                session.set_autoplay(enabled).await?;
                Ok(json!({"success": true, "autoplay": enabled}))
            }
            SessionCommand::SetLoopState => {
                let args: LoopArgs = parse_args(self.name(), args)?;
                session.set_loop(args.mode).await?;
                Ok(json!({"success": true, "loop": args.mode}))
            }
            SessionCommand::GetLoopState => {
                let state = session.state().await?;
                Ok(json!({"success": true, "loop": state.loop_mode}))
            }
            SessionCommand::NowPlaying => {
                let state = session.state().await?;
                Ok(json!({
                    "success": true,
                    "track": state.current,
                    "queueLength": state.queue.len(),
                }))
            }
            SessionCommand::Queue => {
                let state = session.state().await?;
                Ok(json!({
                    "success": true,
                    "current": state.current,
                    "queue": state.queue,
                }))
            }
            SessionCommand::Pause => {
                session.set_paused(true).await?;
                Ok(json!({"success": true}))
            }
            SessionCommand::Resume => {
                session.set_paused(false).await?;
                Ok(json!({"success": true}))
            }
            SessionCommand::Skip => {
                session.skip().await?;
                Ok(json!({"success": true}))
            }
            SessionCommand::Stop => {
                session.destroy().await?;
                Ok(json!({"success": true}))
            }
        }
    }
}

#[derive(Deserialize)]
struct QueryArgs {
    query: String,
}

/// `search{query}` bound to one session; the only tool autoplay gets.
pub struct SessionSearchTool {
    session: Arc<dyn PlaybackSession>,
}

impl SessionSearchTool {
    pub fn new(session: Arc<dyn PlaybackSession>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Tool for SessionSearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search for songs."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"query": {"type": "string", "minLength": 1}},
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value> {
        let args: QueryArgs = parse_args(self.name(), args)?;
        let result = self.session.search(&args.query, None).await?;
        to_value(&result)
    }
}
