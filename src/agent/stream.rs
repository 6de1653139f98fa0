//! Stream aggregation
//!
//! Rebuilds full content and complete tool calls from partial chunks.
//!
//! Content deltas are appended in arrival order, except that a delta equal
//! to the reasoning close tag resets the buffer: everything the model
//! produced before it (its thinking trace) is discarded. Text that merely
//! mentions the tag is ordinary content.
//!
//! Tool-call fragments are keyed by their reported index. The first fragment
//! for an index creates the slot with id, type and name; later fragments
//! only append to the argument text.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{CordError, Result};
use crate::providers::{ChunkReceiver, CompletionChunk, FinishReason, ToolCallDelta};
use crate::session::ToolCall;

/// Delta that marks the end of a reasoning trace.
pub const REASONING_CLOSE: &str = "</think>";

/// Tool calls under construction, indexed by chunk-reported position.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    slots: BTreeMap<usize, ToolCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one fragment into its slot.
    pub fn apply(&mut self, delta: &ToolCallDelta) {
        match self.slots.get_mut(&delta.index) {
            Some(slot) => {
                if let Some(fragment) = &delta.arguments {
                    slot.function.arguments.push_str(fragment);
                }
            }
            None => {
                let mut call = ToolCall::new(
                    delta.id.as_deref().unwrap_or_default(),
                    delta.name.as_deref().unwrap_or_default(),
                    delta.arguments.as_deref().unwrap_or_default(),
                );
                if let Some(kind) = &delta.kind {
                    call.kind = kind.clone();
                }
                self.slots.insert(delta.index, call);
            }
        }
    }

    /// Completed calls in index order; gaps in the index space are skipped.
    pub fn completed(&self) -> Vec<ToolCall> {
        self.slots.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// How a completion stream ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    /// The model wants tools run before it continues
    ToolCalls {
        content: String,
        calls: Vec<ToolCall>,
    },
    /// `stop`, `length`, `content_filter` or an unrecognized reason
    Finished {
        content: String,
        reason: FinishReason,
    },
}

impl StreamOutcome {
    pub fn content(&self) -> &str {
        match self {
            StreamOutcome::ToolCalls { content, .. } | StreamOutcome::Finished { content, .. } => {
                content
            }
        }
    }
}

/// Accumulates one completion stream.
#[derive(Debug, Default)]
pub struct StreamAggregator {
    content: String,
    tool_calls: ToolCallAccumulator,
    finish: Option<FinishReason>,
}

impl StreamAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a chunk in. Returns the finish reason once one arrives; callers
    /// stop reading at that point.
    pub fn push(&mut self, chunk: &CompletionChunk) -> Option<&FinishReason> {
        let choice = chunk.choice.as_ref()?;

        if let Some(delta) = &choice.content {
            self.push_content(delta);
        }
        for delta in &choice.tool_calls {
            self.tool_calls.apply(delta);
        }
        if let Some(reason) = &choice.finish_reason {
            self.finish = Some(reason.clone());
        }
        self.finish.as_ref()
    }

    fn push_content(&mut self, delta: &str) {
        if delta == REASONING_CLOSE {
            self.content.clear();
        } else {
            self.content.push_str(delta);
        }
    }

    /// Content accumulated so far.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Close the stream. Without a finish reason this is `StreamIncomplete`.
    pub fn finish(self) -> Result<StreamOutcome> {
        let reason = self.finish.ok_or(CordError::StreamIncomplete)?;
        if reason == FinishReason::ToolCalls {
            if self.tool_calls.is_empty() {
                warn!("Finish reason tool_calls without any tool call, ending turn");
            } else {
                return Ok(StreamOutcome::ToolCalls {
                    content: self.content,
                    calls: self.tool_calls.completed(),
                });
            }
        }
        Ok(StreamOutcome::Finished {
            content: self.content,
            reason,
        })
    }
}

/// Next chunk from `rx`, or `None` once the sender closed.
///
/// `idle_timeout` bounds the wait; expiry is a transport error. A transport
/// error from the stream itself is returned as is.
pub async fn next_chunk(
    rx: &mut ChunkReceiver,
    idle_timeout: Option<Duration>,
) -> Result<Option<CompletionChunk>> {
    let next = match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, rx.recv()).await.map_err(|_| {
            CordError::Transport(format!("no stream data for {}s", limit.as_secs_f32()))
        })?,
        None => rx.recv().await,
    };
    next.transpose()
}

/// Drain `rx` until a finish reason, reporting content after every chunk
/// that changed it.
pub async fn aggregate<F>(
    rx: &mut ChunkReceiver,
    idle_timeout: Option<Duration>,
    mut on_content: F,
) -> Result<StreamOutcome>
where
    F: FnMut(&str),
{
    let mut aggregator = StreamAggregator::new();
    let mut chunks = 0usize;

    while let Some(chunk) = next_chunk(rx, idle_timeout).await? {
        chunks += 1;

        let before = aggregator.content().len();
        let finished = aggregator.push(&chunk).is_some();
        if aggregator.content().len() != before || finished {
            on_content(aggregator.content());
        }
        if finished {
            debug!(chunks, "Stream finished");
            return aggregator.finish();
        }
    }

    debug!(chunks, "Stream closed");
    aggregator.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ChoiceDelta;
    use tokio::sync::mpsc;

    fn tc(index: usize, id: Option<&str>, name: Option<&str>, args: &str) -> CompletionChunk {
        CompletionChunk::tool_call(index, id, name, Some(args))
    }

    fn run(chunks: &[CompletionChunk]) -> Result<StreamOutcome> {
        let mut agg = StreamAggregator::new();
        for chunk in chunks {
            if agg.push(chunk).is_some() {
                break;
            }
        }
        agg.finish()
    }

    #[test]
    fn test_content_concatenates_in_order() {
        let outcome = run(&[
            CompletionChunk::content("Hel"),
            CompletionChunk::empty(),
            CompletionChunk::content("lo"),
            CompletionChunk::finish(FinishReason::Stop),
        ])
        .unwrap();
        assert_eq!(
            outcome,
            StreamOutcome::Finished {
                content: "Hello".into(),
                reason: FinishReason::Stop
            }
        );
    }

    #[test]
    fn test_reasoning_close_resets_buffer() {
        let outcome = run(&[
            CompletionChunk::content("let me think"),
            CompletionChunk::content(REASONING_CLOSE),
            CompletionChunk::content("4"),
            CompletionChunk::finish(FinishReason::Stop),
        ])
        .unwrap();
        assert_eq!(outcome.content(), "4");
    }

    #[test]
    fn test_last_reset_wins() {
        let outcome = run(&[
            CompletionChunk::content("a"),
            CompletionChunk::content(REASONING_CLOSE),
            CompletionChunk::content("b"),
            CompletionChunk::content(REASONING_CLOSE),
            CompletionChunk::content("c"),
            CompletionChunk::content("d"),
            CompletionChunk::finish(FinishReason::Length),
        ])
        .unwrap();
        assert_eq!(outcome.content(), "cd");
    }

    #[test]
    fn test_tag_inside_text_is_plain_content() {
        let outcome = run(&[
            CompletionChunk::content("Close reasoning with "),
            CompletionChunk::content("the `</think>` tag."),
            CompletionChunk::finish(FinishReason::Stop),
        ])
        .unwrap();
        assert_eq!(outcome.content(), "Close reasoning with the `</think>` tag.");
    }

    #[test]
    fn test_interleaved_tool_call_fragments() {
        let outcome = run(&[
            tc(0, Some("c0"), Some("a"), "{\"x\":"),
            tc(1, Some("c1"), Some("b"), "{\"y\""),
            tc(0, None, None, "1}"),
            tc(1, None, None, ":2}"),
            CompletionChunk::finish(FinishReason::ToolCalls),
        ])
        .unwrap();
        match outcome {
            StreamOutcome::ToolCalls { calls, .. } => {
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[0].id, "c0");
                assert_eq!(calls[0].arguments(), "{\"x\":1}");
                assert_eq!(calls[1].name(), "b");
                assert_eq!(calls[1].arguments(), "{\"y\":2}");
            }
            other => panic!("expected tool calls, got {:?}", other),
        }
    }

    #[test]
    fn test_later_fragments_never_overwrite_identity() {
        let mut acc = ToolCallAccumulator::new();
        acc.apply(&ToolCallDelta {
            index: 0,
            id: Some("first".into()),
            kind: Some("function".into()),
            name: Some("math".into()),
            arguments: None,
        });
        acc.apply(&ToolCallDelta {
            index: 0,
            id: Some("second".into()),
            kind: None,
            name: Some("other".into()),
            arguments: Some("{}".into()),
        });
        let calls = acc.completed();
        assert_eq!(calls[0].id, "first");
        assert_eq!(calls[0].name(), "math");
        assert_eq!(calls[0].arguments(), "{}");
    }

    #[test]
    fn test_sparse_indices_keep_order() {
        let mut acc = ToolCallAccumulator::new();
        acc.apply(&ToolCallDelta {
            index: 3,
            id: Some("c3".into()),
            ..Default::default()
        });
        acc.apply(&ToolCallDelta {
            index: 1,
            id: Some("c1".into()),
            ..Default::default()
        });
        let ids: Vec<String> = acc.completed().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["c1", "c3"]);
    }

    #[test]
    fn test_exhausted_without_finish_is_incomplete() {
        let result = run(&[CompletionChunk::content("partial")]);
        assert!(matches!(result, Err(CordError::StreamIncomplete)));
    }

    #[test]
    fn test_tool_calls_reason_without_calls_finishes() {
        let outcome = run(&[
            CompletionChunk::content("ok"),
            CompletionChunk::finish(FinishReason::ToolCalls),
        ])
        .unwrap();
        assert!(matches!(outcome, StreamOutcome::Finished { .. }));
    }

    #[test]
    fn test_finish_and_content_in_same_chunk() {
        let chunk = CompletionChunk {
            choice: Some(ChoiceDelta {
                content: Some("done".into()),
                tool_calls: Vec::new(),
                finish_reason: Some(FinishReason::ContentFilter),
            }),
        };
        let outcome = run(&[chunk]).unwrap();
        assert_eq!(
            outcome,
            StreamOutcome::Finished {
                content: "done".into(),
                reason: FinishReason::ContentFilter
            }
        );
    }

    #[tokio::test]
    async fn test_aggregate_reports_progress_and_stops_at_finish() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(Ok(CompletionChunk::content("a"))).await.unwrap();
        tx.send(Ok(CompletionChunk::content("b"))).await.unwrap();
        tx.send(Ok(CompletionChunk::finish(FinishReason::Stop)))
            .await
            .unwrap();
        // Never read: the aggregator stops at the finish reason.
        tx.send(Ok(CompletionChunk::content("ignored"))).await.unwrap();

        let mut seen = Vec::new();
        let outcome = aggregate(&mut rx, None, |c| seen.push(c.to_string()))
            .await
            .unwrap();
        assert_eq!(outcome.content(), "ab");
        assert_eq!(seen, vec!["a", "ab", "ab"]);
    }

    #[tokio::test]
    async fn test_aggregate_propagates_transport_error() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(Ok(CompletionChunk::content("a"))).await.unwrap();
        tx.send(Err(CordError::Transport("reset".into())))
            .await
            .unwrap();
        let result = aggregate(&mut rx, None, |_| {}).await;
        assert!(matches!(result, Err(CordError::Transport(_))));
    }

    #[tokio::test]
    async fn test_aggregate_closed_channel_is_incomplete() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(Ok(CompletionChunk::content("a"))).await.unwrap();
        drop(tx);
        let result = aggregate(&mut rx, None, |_| {}).await;
        assert!(matches!(result, Err(CordError::StreamIncomplete)));
    }

    #[tokio::test]
    async fn test_aggregate_idle_timeout() {
        let (_tx, mut rx) = mpsc::channel::<Result<CompletionChunk>>(8);
        let result = aggregate(&mut rx, Some(Duration::from_millis(20)), |_| {}).await;
        assert!(matches!(result, Err(CordError::Transport(_))));
    }
}
