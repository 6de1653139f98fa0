//! zeptocord - Discord gateway for streaming tool-calling language models
//!
//! An inbound mention becomes one conversational turn: the completion stream
//! is aggregated chunk by chunk, requested tool calls are dispatched with
//! per-call isolation, and the final answer is delivered as a set of chunked
//! Discord messages kept in sync by edit, create and delete.

pub mod agent;
pub mod bus;
pub mod channels;
pub mod config;
pub mod error;
pub mod providers;
pub mod session;
pub mod tools;
pub mod utils;

pub use agent::{AutoplayLoop, ConversationLoop, TurnOutcome};
pub use bus::{InboundMessage, MessageBus};
pub use config::Config;
pub use error::{CordError, Result};
pub use providers::{CompletionClient, OpenAiCompatClient};
pub use session::{ConversationManager, ConversationStore, Message, Role, ToolCall};
pub use tools::{Tool, ToolRegistry};
