//! Channels module - Discord transport and capability traits
//!
//! Channels receive user messages and publish them to the [`MessageBus`];
//! each turn then replies through the [`MessageChannel`] its
//! [`ConversationOpener`] hands back.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   MESSAGE_CREATE   ┌────────────┐
//! │  DiscordChannel  │───────────────────>│ MessageBus │
//! │    (gateway)     │                    └─────┬──────┘
//! └──────────────────┘                          │
//!                                               ▼
//! ┌──────────────────┐      open()      ┌──────────────────┐
//! │  DiscordOpener   │<─────────────────│ ConversationLoop │
//! │ (thread routing) │─────────────────>│                  │
//! └──────────────────┘  MessageChannel  └──────────────────┘
//! ```
//!
//! Playback is modeled the same way: [`PlaybackManager`] and
//! [`PlaybackSession`] are capabilities the music tools and the autoplay
//! loop consume, with no transport shipped in this crate.
//!
//! [`MessageBus`]: crate::bus::MessageBus

pub mod discord;
pub mod playback;
mod types;

pub use discord::{DiscordChannel, DiscordOpener, DiscordReplyChannel, DiscordRest};
pub use playback::{
    LoopMode, PlaybackManager, PlaybackSession, PlaybackState, SearchKind, SearchResult, Track,
};
pub use types::{
    BaseChannelConfig, Channel, ConversationOpener, DiscordApi, MessageChannel,
    OpenedConversation, ReplyHandle,
};
