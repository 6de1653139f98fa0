//! Autoplay continuation
//!
//! When a session's queue runs dry with autoplay on, the model picks the next
//! song. It may call `search` any number of times and must finish with
//! `{"track": {"title": "", "author": ""}, "url": ""}`. Anything else
//! (no completion choice, content that does not parse, a suggestion with no
//! search results) destroys the session instead of retrying.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::channels::{PlaybackSession, PlaybackState, Track};
use crate::config::{ConversationConfig, MusicConfig};
use crate::error::Result;
use crate::providers::{ChatOptions, CompletionClient, CompletionRequest, ToolDefinition};
use crate::session::Message;
use crate::tools::{build_autoplay_registry, ToolContext, ToolRegistry, ToolResult};

use super::stream::{next_chunk, StreamAggregator, StreamOutcome};

/// Notice posted when the player is torn down.
pub const INACTIVITY_NOTICE: &str = "Destroyed player due to inactivity.";

const AUTOPLAY_PROMPT: &str = "You are a music bot that plays music and suggests music (using the search function) and doesn't repeat previous songs. You will always respond in the following format: { \"track\": { \"title\": \"\", \"author\": \"\" }, \"url\": \"\" }";

/// What the model must answer with.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Suggestion {
    pub track: SuggestedTrack,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SuggestedTrack {
    pub title: String,
    pub author: String,
}

impl Suggestion {
    /// Parse final content, tolerating a surrounding code fence.
    pub fn parse(content: &str) -> std::result::Result<Self, serde_json::Error> {
        let trimmed = content.trim();
        let body = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .and_then(|rest| rest.strip_suffix("```"))
            .unwrap_or(trimmed);
        serde_json::from_str(body.trim())
    }

    /// Query used to look the suggestion up.
    pub fn query(&self) -> String {
        format!("{} {}", self.track.title, self.track.author)
    }
}

/// Why the session was torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoplayStop {
    Disabled,
    /// Nothing was ever played to continue from
    NoSeed,
    NoChoice,
    InvalidSuggestion(String),
    NoResults,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoplayOutcome {
    Queued { query: String, tracks: usize },
    Destroyed(AutoplayStop),
}

/// Picks the next song for sessions whose queue ended.
pub struct AutoplayLoop {
    client: Arc<dyn CompletionClient>,
    history: usize,
    idle_timeout: Option<Duration>,
    max_rounds: Option<u32>,
    options: ChatOptions,
}

impl AutoplayLoop {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self {
            client,
            history: MusicConfig::default().autoplay_history,
            idle_timeout: None,
            max_rounds: None,
            options: ChatOptions::default(),
        }
    }

    pub fn with_music_config(mut self, music: &MusicConfig) -> Self {
        self.history = music.autoplay_history;
        self
    }

    pub fn with_limits(mut self, limits: &ConversationConfig) -> Self {
        self.idle_timeout = limits.stream_idle_timeout_secs.map(Duration::from_secs);
        self.max_rounds = limits.max_tool_rounds;
        self
    }

    pub fn with_chat_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    /// Handle an emptied queue.
    pub async fn on_queue_empty(&self, session: Arc<dyn PlaybackSession>) -> AutoplayOutcome {
        let guild = session.guild_id().to_string();
        match self.continue_playback(&session).await {
            Ok(Ok((query, tracks))) => {
                info!(guild = %guild, query = %query, tracks, "Autoplay queued");
                AutoplayOutcome::Queued { query, tracks }
            }
            Ok(Err(stop)) => self.shut_down(session.as_ref(), stop).await,
            Err(e) => {
                self.shut_down(session.as_ref(), AutoplayStop::Failed(e.to_string()))
                    .await
            }
        }
    }

    async fn continue_playback(
        &self,
        session: &Arc<dyn PlaybackSession>,
    ) -> Result<std::result::Result<(String, usize), AutoplayStop>> {
        let state = session.state().await?;
        if !state.autoplay {
            return Ok(Err(AutoplayStop::Disabled));
        }
        let Some(seed) = state.current.clone().or_else(|| state.previous.first().cloned()) else {
            return Ok(Err(AutoplayStop::NoSeed));
        };

        let registry = build_autoplay_registry(Arc::clone(session));
        let ctx = ToolContext::new().with_guild(session.guild_id());
        let mut messages = self.prompt(&state, &seed);

        let Some(content) = self.ask(&mut messages, &registry, &ctx).await? else {
            return Ok(Err(AutoplayStop::NoChoice));
        };
        let suggestion = match Suggestion::parse(&content) {
            Ok(suggestion) => suggestion,
            Err(e) => {
                debug!(content = %content, "Unparsable autoplay suggestion");
                return Ok(Err(AutoplayStop::InvalidSuggestion(e.to_string())));
            }
        };

        let query = suggestion.query();
        let result = session.search(&query, seed.requester.as_deref()).await?;
        if result.tracks.is_empty() {
            return Ok(Err(AutoplayStop::NoResults));
        }

        let tracks = if result.is_playlist() {
            result.tracks
        } else {
            let pick = result.tracks.choose(&mut rand::thread_rng()).cloned();
            pick.into_iter().collect()
        };
        let count = tracks.len();
        session.enqueue(tracks).await?;

        if !state.playing && !state.paused {
            session.play().await?;
        }
        Ok(Ok((query, count)))
    }

    fn prompt(&self, state: &PlaybackState, seed: &Track) -> Vec<Message> {
        let previous: Vec<String> = state
            .previous
            .iter()
            .take(self.history)
            .enumerate()
            .map(|(i, t)| format!("{}. **{}** by **{}**", i, t.title, t.author))
            .collect();

        vec![
            Message::system(AUTOPLAY_PROMPT),
            Message::assistant(&format!("Previous songs:\n{}", previous.join("\n"))),
            Message::user(&format!(
                "Now playing **{}** by **{}**. Can you suggest a song to play next?",
                seed.title, seed.author
            )),
        ]
    }

    /// Run completion rounds until the model answers.
    ///
    /// `None` when a stream carried no choice at all.
    async fn ask(
        &self,
        messages: &mut Vec<Message>,
        registry: &ToolRegistry,
        ctx: &ToolContext,
    ) -> Result<Option<String>> {
        let definitions: Vec<ToolDefinition> = registry.definitions();
        let mut rounds: u32 = 0;

        loop {
            let request = CompletionRequest::new(messages.clone(), definitions.clone())
                .with_options(self.options.clone());
            let mut rx = self.client.stream(request).await?;

            let mut aggregator = StreamAggregator::new();
            let mut saw_choice = false;
            while let Some(chunk) = next_chunk(&mut rx, self.idle_timeout).await? {
                saw_choice |= chunk.choice.is_some();
                if aggregator.push(&chunk).is_some() {
                    break;
                }
            }
            if !saw_choice {
                return Ok(None);
            }

            match aggregator.finish()? {
                StreamOutcome::Finished { content, .. } => return Ok(Some(content)),
                StreamOutcome::ToolCalls { content, calls } => {
                    if self.max_rounds.is_some_and(|max| rounds >= max) {
                        warn!(rounds, "Autoplay tool round limit reached");
                        return Ok(Some(content));
                    }
                    rounds += 1;
                    let results = registry.dispatch(&calls, ctx).await;
                    messages.push(Message::assistant_with_tools(&content, calls));
                    messages.extend(results.iter().map(ToolResult::to_message));
                }
            }
        }
    }

    async fn shut_down(&self, session: &dyn PlaybackSession, stop: AutoplayStop) -> AutoplayOutcome {
        info!(guild = %session.guild_id(), reason = ?stop, "Autoplay stopping player");
        if let Err(e) = session.destroy().await {
            warn!("Failed to destroy player: {}", e);
        }
        if let Err(e) = session.notify(INACTIVITY_NOTICE).await {
            warn!("Failed to post inactivity notice: {}", e);
        }
        AutoplayOutcome::Destroyed(stop)
    }
}
