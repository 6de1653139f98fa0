//! Configuration type definitions for ZeptoCord
//!
//! All sections use `#[serde(default)]` so a partial `config.json` is valid.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default API version sent to Azure-style OpenAI deployments.
pub const DEFAULT_API_VERSION: &str = "2025-03-01-preview";

/// Main configuration struct for ZeptoCord
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Completion service endpoint and model
    pub provider: ProviderConfig,
    /// Discord bot settings
    pub discord: DiscordConfig,
    /// Conversation store and turn limits
    pub conversation: ConversationConfig,
    /// Outgoing reply chunking and pacing
    pub reply: ReplyConfig,
    /// Music autoplay behaviour
    pub music: MusicConfig,
    /// Logging output
    pub logging: LoggingConfig,
}

// ============================================================================
// Provider
// ============================================================================

/// OpenAI-compatible completion service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`
    pub api_base: Option<String>,
    /// API key (sent as bearer token and `api-key` header)
    pub api_key: Option<String>,
    /// Model or deployment name
    pub model: Option<String>,
    /// `api-version` query parameter; `None` omits it
    pub api_version: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: None,
            api_key: None,
            model: None,
            api_version: Some(DEFAULT_API_VERSION.to_string()),
            temperature: None,
            max_tokens: None,
        }
    }
}

// ============================================================================
// Discord
// ============================================================================

/// Discord channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    /// Whether the channel is enabled
    pub enabled: bool,
    /// Bot token from Discord Developer Portal
    pub token: String,
    /// Allowlist of user IDs (empty = allow all)
    pub allow_from: Vec<String>,
    /// Name given to threads started for new conversations
    pub thread_name: String,
    /// Thread auto-archive duration in minutes (60, 1440, 4320 or 10080)
    pub thread_auto_archive_minutes: u32,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token: String::new(),
            allow_from: Vec::new(),
            thread_name: "ChatGPT".to_string(),
            thread_auto_archive_minutes: 1440,
        }
    }
}

// ============================================================================
// Conversation
// ============================================================================

/// Conversation store and orchestration limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Directory for persisted records; `None` keeps everything in memory
    pub storage_dir: Option<PathBuf>,
    /// Seconds after which a held lock is considered abandoned (0 = never)
    pub lock_lease_secs: u64,
    /// Maximum tool-dispatch rounds per turn; `None` is unbounded
    pub max_tool_rounds: Option<u32>,
    /// Seconds to wait for the next stream chunk; `None` waits forever
    pub stream_idle_timeout_secs: Option<u64>,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            storage_dir: Some(super::Config::dir().join("conversations")),
            lock_lease_secs: 900,
            max_tool_rounds: None,
            stream_idle_timeout_secs: None,
        }
    }
}

// ============================================================================
// Reply
// ============================================================================

/// Outgoing reply chunking and pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyConfig {
    /// Maximum characters per outgoing message
    pub chunk_size: usize,
    /// Live preview edit interval while streaming
    pub flush_interval_ms: u64,
    /// Delay between edit/create/delete operations during reconciliation
    pub edit_interval_ms: u64,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2000,
            flush_interval_ms: 500,
            edit_interval_ms: 500,
        }
    }
}

// ============================================================================
// Music
// ============================================================================

/// Autoplay behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MusicConfig {
    /// How many previously played tracks are shown to the model
    pub autoplay_history: usize,
}

impl Default for MusicConfig {
    fn default() -> Self {
        Self {
            autoplay_history: 10,
        }
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable compact text
    #[default]
    Pretty,
    /// JSON lines for log aggregators
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            level: "info".to_string(),
        }
    }
}
