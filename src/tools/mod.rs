//! Tools module - Tool definitions and dispatch for model function calling
//!
//! Tools are callable capabilities the model can invoke mid-conversation.
//! Each turn builds a [`ToolRegistry`] from the capabilities available to
//! it; the dispatcher validates arguments against each tool's schema and
//! turns every failure into a result the model can read.
//!
//! # Overview
//!
//! - `Tool` trait: name, description, argument schema, async handler
//! - `ToolContext`: where the call comes from (guild, channel, requester)
//! - `ToolRegistry`: lookup by name and per-call isolated dispatch
//!
//! # Built-in Tools
//!
//! - `math::MathTool`: arithmetic expressions
//! - `discord::*`: user/channel/guild/message lookups, embeds, reactions
//! - `music::*`: search, play and player control
//!
//! # Example
//!
//! ```rust
//! use zeptocord::tools::{build_chat_registry, ToolContext};
//! use zeptocord::session::ToolCall;
//!
//! # tokio_test::block_on(async {
//! let registry = build_chat_registry(None, None);
//! let calls = vec![ToolCall::new("call_1", "execute_math_expression", r#"{"expression":"2+2"}"#)];
//! let results = registry.dispatch(&calls, &ToolContext::new()).await;
//! assert_eq!(results[0].content(), r#"{"result":"4"}"#);
//! # });
//! ```

pub mod discord;
pub mod math;
pub mod music;
mod registry;
pub mod schema;
mod types;

pub use registry::ToolRegistry;
pub use types::{
    parse_args, to_value, Tool, ToolContext, ToolFailure, ToolFailureKind, ToolResult,
};

use std::sync::Arc;

use crate::channels::{DiscordApi, PlaybackManager, PlaybackSession};

/// Registry for a chat turn.
///
/// Math is always available; Discord and music tools only when their
/// capability is wired in.
pub fn build_chat_registry(
    discord: Option<Arc<dyn DiscordApi>>,
    playback: Option<Arc<dyn PlaybackManager>>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(math::MathTool));
    if let Some(api) = discord {
        for tool in discord::discord_tools(api) {
            registry.register(tool);
        }
    }
    if let Some(manager) = playback {
        for tool in music::music_tools(manager) {
            registry.register(tool);
        }
    }
    registry
}

/// Registry for an autoplay pick: only `search` over the session.
pub fn build_autoplay_registry(session: Arc<dyn PlaybackSession>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(music::SessionSearchTool::new(session)));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_registry_math_only() {
        let registry = build_chat_registry(None, None);
        assert_eq!(registry.len(), 1);
        assert!(registry.has("execute_math_expression"));
    }
}
