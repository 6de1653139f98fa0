//! Configuration management for ZeptoCord
//!
//! Configuration is loaded from `~/.zeptocord/config.json` with environment
//! variable overrides. Two naming schemes are honoured:
//! - `ZEPTOCORD_SECTION_KEY` (e.g. `ZEPTOCORD_PROVIDER_MODEL`)
//! - the bare deployment names `BASE_URL`, `API_KEY`, `MODEL_NAME`, `DISCORD_TOKEN`
//!
//! The prefixed form wins when both are set.

mod types;
pub mod validate;

pub use types::*;

use crate::error::{CordError, Result};
use std::path::{Path, PathBuf};

impl Config {
    /// Returns the ZeptoCord configuration directory path (~/.zeptocord)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".zeptocord")
    }

    /// Returns the path to the config file (~/.zeptocord/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    ///
    /// A missing file yields the default configuration.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_env_overrides_from(|key| std::env::var(key).ok());

        Ok(config)
    }

    /// Apply overrides using the given variable lookup.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |prefixed: &str, bare: Option<&str>| {
            lookup(prefixed)
                .or_else(|| bare.and_then(&lookup))
                .filter(|v| !v.trim().is_empty())
        };

        // Provider
        if let Some(val) = var("ZEPTOCORD_PROVIDER_API_BASE", Some("BASE_URL")) {
            self.provider.api_base = Some(val);
        }
        if let Some(val) = var("ZEPTOCORD_PROVIDER_API_KEY", Some("API_KEY")) {
            self.provider.api_key = Some(val);
        }
        if let Some(val) = var("ZEPTOCORD_PROVIDER_MODEL", Some("MODEL_NAME")) {
            self.provider.model = Some(val);
        }
        if let Some(val) = var("ZEPTOCORD_PROVIDER_API_VERSION", None) {
            self.provider.api_version = Some(val);
        }
        if let Some(v) = var("ZEPTOCORD_PROVIDER_TEMPERATURE", None).and_then(|v| v.parse().ok())
        {
            self.provider.temperature = Some(v);
        }
        if let Some(v) = var("ZEPTOCORD_PROVIDER_MAX_TOKENS", None).and_then(|v| v.parse().ok()) {
            self.provider.max_tokens = Some(v);
        }

        // Discord
        if let Some(val) = var("ZEPTOCORD_DISCORD_TOKEN", Some("DISCORD_TOKEN")) {
            self.discord.token = val;
        }
        if let Some(v) = var("ZEPTOCORD_DISCORD_ENABLED", None).and_then(|v| v.parse().ok()) {
            self.discord.enabled = v;
        }
        if let Some(val) = var("ZEPTOCORD_DISCORD_ALLOW_FROM", None) {
            self.discord.allow_from = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // Conversation
        if let Some(val) = var("ZEPTOCORD_CONVERSATION_STORAGE_DIR", None) {
            self.conversation.storage_dir = Some(PathBuf::from(val));
        }
        if let Some(v) =
            var("ZEPTOCORD_CONVERSATION_LOCK_LEASE_SECS", None).and_then(|v| v.parse().ok())
        {
            self.conversation.lock_lease_secs = v;
        }
        if let Some(v) =
            var("ZEPTOCORD_CONVERSATION_MAX_TOOL_ROUNDS", None).and_then(|v| v.parse().ok())
        {
            self.conversation.max_tool_rounds = Some(v);
        }
        if let Some(v) = var("ZEPTOCORD_CONVERSATION_STREAM_IDLE_TIMEOUT_SECS", None)
            .and_then(|v| v.parse().ok())
        {
            self.conversation.stream_idle_timeout_secs = Some(v);
        }

        // Logging
        if let Some(val) = var("ZEPTOCORD_LOGGING_LEVEL", None) {
            self.logging.level = val;
        }
        if let Some(val) = var("ZEPTOCORD_LOGGING_FORMAT", None) {
            match val.to_ascii_lowercase().as_str() {
                "json" => self.logging.format = LogFormat::Json,
                "pretty" => self.logging.format = LogFormat::Pretty,
                _ => {}
            }
        }
    }

    /// Check that everything needed to start the gateway is present.
    ///
    /// All problems are reported together in one `CordError::Config`.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        let blank = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());

        if blank(&self.provider.api_base) {
            missing.push("provider.api_base (BASE_URL)");
        }
        if blank(&self.provider.api_key) {
            missing.push("provider.api_key (API_KEY)");
        }
        if blank(&self.provider.model) {
            missing.push("provider.model (MODEL_NAME)");
        }
        if self.discord.enabled && self.discord.token.trim().is_empty() {
            missing.push("discord.token (DISCORD_TOKEN)");
        }

        let mut problems: Vec<String> = missing
            .into_iter()
            .map(|m| format!("missing {}", m))
            .collect();
        if self.reply.chunk_size == 0 {
            problems.push("reply.chunk_size must be greater than 0".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(CordError::Config(problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.reply.chunk_size, 2000);
        assert_eq!(config.reply.flush_interval_ms, 500);
        assert_eq!(config.conversation.lock_lease_secs, 900);
        assert!(config.conversation.max_tool_rounds.is_none());
        assert_eq!(config.discord.thread_name, "ChatGPT");
        assert_eq!(
            config.provider.api_version.as_deref(),
            Some(DEFAULT_API_VERSION)
        );
    }

    #[test]
    fn test_bare_env_names() {
        let mut config = Config::default();
        config.apply_env_overrides_from(lookup(&[
            ("BASE_URL", "https://example.test/v1"),
            ("API_KEY", "k"),
            ("MODEL_NAME", "gpt-4o"),
            ("DISCORD_TOKEN", "tok"),
        ]));
        assert_eq!(
            config.provider.api_base.as_deref(),
            Some("https://example.test/v1")
        );
        assert_eq!(config.provider.model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.discord.token, "tok");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_prefixed_env_wins() {
        let mut config = Config::default();
        config.apply_env_overrides_from(lookup(&[
            ("MODEL_NAME", "bare"),
            ("ZEPTOCORD_PROVIDER_MODEL", "prefixed"),
            ("ZEPTOCORD_CONVERSATION_MAX_TOOL_ROUNDS", "8"),
            ("ZEPTOCORD_DISCORD_ALLOW_FROM", "1, 2,,3"),
        ]));
        assert_eq!(config.provider.model.as_deref(), Some("prefixed"));
        assert_eq!(config.conversation.max_tool_rounds, Some(8));
        assert_eq!(config.discord.allow_from, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_validate_reports_all_missing() {
        let err = Config::default().validate().unwrap_err().to_string();
        assert!(err.contains("provider.api_base"));
        assert!(err.contains("provider.api_key"));
        assert!(err.contains("provider.model"));
        assert!(err.contains("discord.token"));
    }

    #[test]
    fn test_load_from_missing_path_gives_defaults() {
        let config = Config::load_from_path(Path::new("/nonexistent/zeptocord.json")).unwrap();
        assert_eq!(config.reply.chunk_size, 2000);
    }

    #[test]
    fn test_partial_json() {
        let config: Config =
            serde_json::from_str(r#"{"reply":{"chunk_size":100},"conversation":{"storage_dir":null}}"#)
                .unwrap();
        assert_eq!(config.reply.chunk_size, 100);
        assert_eq!(config.reply.edit_interval_ms, 500);
        assert!(config.conversation.storage_dir.is_none());
    }
}
