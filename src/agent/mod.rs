//! Agent module - turn orchestration over a streaming completion service
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────┐     ┌──────────────────┐
//! │  MessageBus │────>│ ConversationLoop │────>│ CompletionClient │
//! │  (inbound)  │     │                  │<────│   (SSE chunks)   │
//! └─────────────┘     └──────────────────┘     └──────────────────┘
//!                       │      │       │
//!                       ▼      ▼       ▼
//!           ConversationStore  Tools  ReplyReconciler
//! ```
//!
//! - [`stream`]: rebuilds content and tool calls from chunk deltas
//! - [`ConversationLoop`]: one turn per inbound message
//! - [`ReplyReconciler`] / [`FlushTimer`]: chunked replies and live preview
//! - [`AutoplayLoop`]: model-picked continuation for an emptied music queue

mod autoplay;
mod context;
mod r#loop;
mod reply;
pub mod stream;

pub use autoplay::{
    AutoplayLoop, AutoplayOutcome, AutoplayStop, SuggestedTrack, Suggestion, INACTIVITY_NOTICE,
};
pub use context::{ContextBuilder, DEFAULT_LOCALE};
pub use r#loop::{
    ConversationLoop, Rejection, TurnOutcome, BUSY_NOTICE, EMPTY_NOTICE, OWNER_NOTICE,
};
pub use reply::{FlushTimer, ReconcileStats, ReplyReconciler};
pub use stream::{aggregate, StreamAggregator, StreamOutcome, ToolCallAccumulator};
