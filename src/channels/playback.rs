//! Playback capability for the music tools and the autoplay loop.
//!
//! A [`PlaybackManager`] owns one [`PlaybackSession`] per guild. The audio
//! node behind them (a Lavalink client or similar) lives outside this crate;
//! only these traits are consumed.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A playable track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub title: String,
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length_ms: Option<u64>,
    /// User id that queued the track
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<String>,
}

impl Track {
    pub fn new(title: &str, author: &str) -> Self {
        Self {
            title: title.to_string(),
            author: author.to_string(),
            uri: None,
            length_ms: None,
            requester: None,
        }
    }

    pub fn with_uri(mut self, uri: &str) -> Self {
        self.uri = Some(uri.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SearchKind {
    /// A whole playlist; every track belongs in the queue
    Playlist,
    /// Independent matches for a query
    Track,
    Search,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(rename = "type")]
    pub kind: SearchKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlist_name: Option<String>,
    pub tracks: Vec<Track>,
}

impl SearchResult {
    pub fn tracks(tracks: Vec<Track>) -> Self {
        Self {
            kind: SearchKind::Search,
            playlist_name: None,
            tracks,
        }
    }

    pub fn playlist(name: &str, tracks: Vec<Track>) -> Self {
        Self {
            kind: SearchKind::Playlist,
            playlist_name: Some(name.to_string()),
            tracks,
        }
    }

    pub fn is_playlist(&self) -> bool {
        self.kind == SearchKind::Playlist
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    #[default]
    None,
    Queue,
    Track,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlaybackState {
    pub current: Option<Track>,
    /// Most recent first
    pub previous: Vec<Track>,
    pub queue: Vec<Track>,
    pub playing: bool,
    pub paused: bool,
    pub loop_mode: LoopMode,
    pub autoplay: bool,
    /// Voice channel the bot is connected to
    pub voice_channel_id: Option<String>,
    /// Text channel that receives player notices
    pub text_channel_id: Option<String>,
}

/// Per-guild player.
#[async_trait]
pub trait PlaybackSession: Send + Sync {
    fn guild_id(&self) -> &str;

    async fn state(&self) -> Result<PlaybackState>;

    async fn search(&self, query: &str, requester: Option<&str>) -> Result<SearchResult>;

    async fn enqueue(&self, tracks: Vec<Track>) -> Result<()>;

    /// Start playing the head of the queue.
    async fn play(&self) -> Result<()>;

    async fn set_paused(&self, paused: bool) -> Result<()>;

    async fn skip(&self) -> Result<()>;

    async fn set_loop(&self, mode: LoopMode) -> Result<()>;

    async fn set_autoplay(&self, enabled: bool) -> Result<()>;

    /// Disconnect and drop the player.
    async fn destroy(&self) -> Result<()>;

    /// Post a notice to the session's text channel.
    async fn notify(&self, text: &str) -> Result<()>;
}

/// Registry of per-guild sessions plus voice-state lookup.
#[async_trait]
pub trait PlaybackManager: Send + Sync {
    async fn search(&self, query: &str, requester: Option<&str>) -> Result<SearchResult>;

    async fn session(&self, guild_id: &str) -> Option<Arc<dyn PlaybackSession>>;

    async fn create_session(
        &self,
        guild_id: &str,
        text_channel_id: &str,
        voice_channel_id: &str,
    ) -> Result<Arc<dyn PlaybackSession>>;

    /// Voice channel the user currently sits in.
    async fn voice_channel_of(&self, guild_id: &str, user_id: &str) -> Result<Option<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_result_wire_shape() {
        let result = SearchResult::playlist("Mix", vec![Track::new("A", "B")]);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["type"], "PLAYLIST");
        assert_eq!(json["tracks"][0]["title"], "A");
        assert!(json["tracks"][0].get("uri").is_none());
        assert!(result.is_playlist());
        assert!(!SearchResult::tracks(vec![]).is_playlist());
    }

    #[test]
    fn test_loop_mode_serde() {
        assert_eq!(serde_json::to_value(LoopMode::Queue).unwrap(), "queue");
        let mode: LoopMode = serde_json::from_str("\"track\"").unwrap();
        assert_eq!(mode, LoopMode::Track);
        assert_eq!(LoopMode::default(), LoopMode::None);
    }
}
