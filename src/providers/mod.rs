//! Completion service layer
//!
//! [`CompletionClient`] is the only seam the orchestration loop sees. The
//! process builds one [`OpenAiCompatClient`] at startup and hands it to every
//! turn; tests substitute scripted clients.

pub mod openai;
pub mod types;

pub use openai::OpenAiCompatClient;
pub use types::{
    ChatOptions, ChoiceDelta, ChunkReceiver, CompletionChunk, CompletionClient,
    CompletionRequest, FinishReason, ToolCallDelta, ToolDefinition,
};
