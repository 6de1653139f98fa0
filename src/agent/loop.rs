//! Conversation loop
//!
//! Drives one conversational turn per inbound message:
//!
//! ```text
//! open conversation -> placeholder -> try_acquire
//!     -> stream -> aggregate -> (dispatch tools -> stream)* -> final content
//!     -> persist -> reconcile replies
//! ```
//!
//! A busy or foreign-owned conversation is rejected before the completion
//! service is contacted. A transport failure aborts the turn, reports the
//! error in the reply and leaves the lock for its lease to clear.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::bus::{InboundMessage, MessageBus};
use crate::channels::{
    ConversationOpener, DiscordApi, OpenedConversation, PlaybackManager, ReplyHandle,
};
use crate::config::{ConversationConfig, ReplyConfig};
use crate::error::{CordError, Result};
use crate::providers::{ChatOptions, CompletionClient, CompletionRequest, ToolDefinition};
use crate::session::{strip_tool_exchanges, Acquire, ConversationStore, Message, ToolCall};
use crate::tools::{build_chat_registry, ToolContext, ToolRegistry, ToolResult};
use crate::utils::string::prefix_chars;

use super::context::ContextBuilder;
use super::reply::{FlushTimer, ReplyReconciler};
use super::stream::{aggregate, StreamOutcome};

/// Shown when a turn is already running in the conversation.
pub const BUSY_NOTICE: &str = "Something is running";
/// Shown when the conversation belongs to another requester.
pub const OWNER_NOTICE: &str = "Another request is running";
/// Shown when the model finished without any content.
pub const EMPTY_NOTICE: &str = "No response";

/// Discord caps the tool notice one below the message limit.
const TOOL_NOTICE_LIMIT: usize = 1999;

/// Why a turn was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Busy,
    OwnerMismatch { owner: String },
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Final content persisted and delivered over `replies` messages
    Completed {
        content: String,
        replies: usize,
        tool_rounds: u32,
    },
    /// The model produced no content; history unchanged
    NoResponse,
    /// Refused before contacting the completion service
    Rejected(Rejection),
    /// Aborted by a turn-fatal error, lock left held
    Failed { error: String },
    /// The message was answered with a notice; no turn ran
    NotOpened,
}

/// Turn driver shared by every conversation.
pub struct ConversationLoop {
    client: Arc<dyn CompletionClient>,
    store: Arc<dyn ConversationStore>,
    opener: Arc<dyn ConversationOpener>,
    discord: Option<Arc<dyn DiscordApi>>,
    playback: Option<Arc<dyn PlaybackManager>>,
    reply: ReplyConfig,
    limits: ConversationConfig,
    options: ChatOptions,
    bot_user: watch::Receiver<Option<Value>>,
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl ConversationLoop {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        store: Arc<dyn ConversationStore>,
        opener: Arc<dyn ConversationOpener>,
    ) -> Self {
        let (_, bot_user) = watch::channel(None);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            client,
            store,
            opener,
            discord: None,
            playback: None,
            reply: ReplyConfig::default(),
            limits: ConversationConfig {
                storage_dir: None,
                ..Default::default()
            },
            options: ChatOptions::default(),
            bot_user,
            running: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    /// Enable the Discord tools.
    pub fn with_discord_api(mut self, api: Arc<dyn DiscordApi>) -> Self {
        self.discord = Some(api);
        self
    }

    /// Enable the music tools.
    pub fn with_playback(mut self, manager: Arc<dyn PlaybackManager>) -> Self {
        self.playback = Some(manager);
        self
    }

    pub fn with_reply_config(mut self, reply: ReplyConfig) -> Self {
        self.reply = reply;
        self
    }

    pub fn with_limits(mut self, limits: ConversationConfig) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_chat_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    /// Source of the bot user shown in the system prompt.
    pub fn with_bot_user(mut self, bot_user: watch::Receiver<Option<Value>>) -> Self {
        self.bot_user = bot_user;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Route a message to its conversation and run a turn there.
    pub async fn process_message(&self, msg: &InboundMessage) -> Result<TurnOutcome> {
        let Some(opened) = self.opener.open(msg).await? else {
            debug!("No conversation opened");
            return Ok(TurnOutcome::NotOpened);
        };
        tracing::Span::current().record("conversation", opened.conversation_id.as_str());
        self.run_turn(msg, opened).await
    }

    /// Run one turn in an already opened conversation.
    pub async fn run_turn(
        &self,
        msg: &InboundMessage,
        opened: OpenedConversation,
    ) -> Result<TurnOutcome> {
        let conversation = opened.conversation_id.as_str();
        let primary = opened
            .channel
            .send(&format!("<@{}> loading...", msg.sender_id))
            .await?;

        let record = match self.store.try_acquire(conversation, &msg.sender_id).await {
            Ok(Acquire::Locked(record)) => record,
            Ok(Acquire::Busy) => {
                debug!("Conversation busy, rejecting");
                edit_quietly(primary.as_ref(), BUSY_NOTICE).await;
                return Ok(TurnOutcome::Rejected(Rejection::Busy));
            }
            Ok(Acquire::OwnerMismatch { owner }) => {
                debug!(owner = %owner, "Conversation owned by another user, rejecting");
                edit_quietly(primary.as_ref(), OWNER_NOTICE).await;
                return Ok(TurnOutcome::Rejected(Rejection::OwnerMismatch { owner }));
            }
            Err(e) => {
                error!("Conversation store failed: {}", e);
                edit_quietly(primary.as_ref(), &self.error_text(&e)).await;
                return Err(e);
            }
        };

        let mut history = record.messages;
        history.push(Message::user(&msg.content).with_name(&msg.author_tag()));

        let registry = build_chat_registry(self.discord.clone(), self.playback.clone());
        let ctx = tool_context(msg, &opened);
        let system = ContextBuilder::new()
            .with_locale(msg.locale.as_deref())
            .with_bot_user(self.bot_user.borrow().clone())
            .with_message(msg.raw.clone())
            .build_system_message();

        let (content_tx, content_rx) = watch::channel(String::new());
        let timer = FlushTimer::spawn(
            Arc::clone(&primary),
            content_rx,
            Duration::from_millis(self.reply.flush_interval_ms),
            self.reply.chunk_size,
        );
        let driven = self
            .drive(&system, &mut history, &registry, &ctx, primary.as_ref(), &content_tx)
            .await;
        timer.cancel().await;

        let (content, tool_rounds) = match driven {
            Ok(done) => done,
            Err(e) => {
                error!(error = %e, fatal = e.is_turn_fatal(), "Turn failed");
                edit_quietly(primary.as_ref(), &self.error_text(&e)).await;
                return Ok(TurnOutcome::Failed {
                    error: e.to_string(),
                });
            }
        };

        if content.trim().is_empty() {
            info!(tool_rounds, "Model returned no content");
            edit_quietly(primary.as_ref(), EMPTY_NOTICE).await;
            self.store.release(conversation).await?;
            return Ok(TurnOutcome::NoResponse);
        }

        history.push(Message::assistant(&content));
        self.store
            .persist(conversation, strip_tool_exchanges(history), &msg.sender_id)
            .await?;

        let mut handles: Vec<Arc<dyn ReplyHandle>> = vec![primary];
        ReplyReconciler::from_config(&self.reply)
            .reconcile(&mut handles, opened.channel.as_ref(), &content)
            .await?;

        info!(
            tool_rounds,
            replies = handles.len(),
            content_len = content.chars().count(),
            "Turn completed"
        );
        Ok(TurnOutcome::Completed {
            content,
            replies: handles.len(),
            tool_rounds,
        })
    }

    /// Stream, dispatch and repeat until the model finishes.
    ///
    /// Returns the last round's content and the number of tool rounds.
    async fn drive(
        &self,
        system: &Message,
        history: &mut Vec<Message>,
        registry: &ToolRegistry,
        ctx: &ToolContext,
        primary: &dyn ReplyHandle,
        content_tx: &watch::Sender<String>,
    ) -> Result<(String, u32)> {
        let definitions: Vec<ToolDefinition> = registry.definitions();
        let idle_timeout = self.limits.stream_idle_timeout_secs.map(Duration::from_secs);
        let mut rounds: u32 = 0;

        loop {
            let mut messages = Vec::with_capacity(history.len() + 1);
            messages.push(system.clone());
            messages.extend(history.iter().cloned());
            let request = CompletionRequest::new(messages, definitions.clone())
                .with_options(self.options.clone());

            let mut rx = self.client.stream(request).await?;
            let outcome = aggregate(&mut rx, idle_timeout, |content| {
                content_tx.send_replace(content.to_string());
            })
            .await?;

            match outcome {
                StreamOutcome::Finished { content, reason } => {
                    debug!(reason = reason.as_str(), rounds, "Model finished");
                    return Ok((content, rounds));
                }
                StreamOutcome::ToolCalls { content, calls } => {
                    if self.limits.max_tool_rounds.is_some_and(|max| rounds >= max) {
                        warn!(rounds, "Tool round limit reached, ending turn");
                        return Ok((content, rounds));
                    }
                    rounds += 1;
                    info!(round = rounds, calls = calls.len(), "Dispatching tool calls");

                    // The finish chunk re-reported this round's content; clear it so
                    // the flush timer cannot paint over the tool notice.
                    content_tx.send_replace(String::new());
                    edit_quietly(primary, &tool_notice(&calls)).await;
                    let results = registry.dispatch(&calls, ctx).await;
                    edit_quietly(
                        primary,
                        &prefix_chars(&results_preview(&results), self.reply.chunk_size),
                    )
                    .await;

                    history.push(Message::assistant_with_tools(&content, calls));
                    history.extend(results.iter().map(ToolResult::to_message));
                }
            }
        }
    }

    fn error_text(&self, err: &CordError) -> String {
        prefix_chars(&format!("```{}```", err), self.reply.chunk_size)
    }

    /// Consume the bus until stopped, one task per message.
    ///
    /// Turns in different conversations run concurrently; the store lock
    /// serializes turns within one conversation.
    pub async fn start(self: Arc<Self>, bus: Arc<MessageBus>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CordError::Config("Conversation loop already running".into()));
        }
        info!("Starting conversation loop");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let _ = *shutdown_rx.borrow_and_update();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Received shutdown signal");
                        break;
                    }
                }
                msg = bus.consume_inbound() => {
                    let Some(msg) = msg else {
                        info!("Inbound channel closed");
                        break;
                    };
                    let span = info_span!(
                        "turn",
                        request_id = %uuid::Uuid::new_v4(),
                        channel = %msg.channel,
                        chat_id = %msg.chat_id,
                        sender = %msg.sender_id,
                        conversation = tracing::field::Empty,
                    );
                    let this = Arc::clone(&self);
                    tokio::spawn(
                        async move {
                            let start = std::time::Instant::now();
                            match this.process_message(&msg).await {
                                Ok(outcome) => debug!(
                                    latency_ms = start.elapsed().as_millis() as u64,
                                    outcome = ?outcome,
                                    "Message handled"
                                ),
                                Err(e) => error!(
                                    latency_ms = start.elapsed().as_millis() as u64,
                                    error = %e,
                                    "Message failed"
                                ),
                            }
                        }
                        .instrument(span),
                    );
                }
            }

            if !self.running.load(Ordering::SeqCst) {
                break;
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Conversation loop stopped");
        Ok(())
    }

    pub fn stop(&self) {
        info!("Stopping conversation loop");
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
    }
}

fn tool_context(msg: &InboundMessage, opened: &OpenedConversation) -> ToolContext {
    let mut ctx = ToolContext::new()
        .with_channel(&opened.conversation_id)
        .with_message(&msg.message_id)
        .with_user(&msg.sender_id, &msg.sender_name)
        .in_thread(opened.in_thread);
    if let Some(guild_id) = msg.guild_id.as_deref() {
        ctx = ctx.with_guild(guild_id);
    }
    ctx
}

fn tool_notice(calls: &[ToolCall]) -> String {
    let json = serde_json::to_string(calls).unwrap_or_default();
    prefix_chars(&format!("Using tools: ```{}```", json), TOOL_NOTICE_LIMIT)
}

fn results_preview(results: &[ToolResult]) -> String {
    let preview: Vec<Value> = results
        .iter()
        .map(|r| json!({ "tool_call_id": r.call_id, "content": r.content() }))
        .collect();
    format!(
        "```{}```",
        serde_json::to_string(&preview).unwrap_or_default()
    )
}

/// Status edits are best effort.
async fn edit_quietly(handle: &dyn ReplyHandle, text: &str) {
    if let Err(e) = handle.edit(text).await {
        warn!(message_id = %handle.id(), "Failed to edit reply: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::MessageChannel;
    use crate::providers::{ChunkReceiver, CompletionChunk, FinishReason};
    use crate::session::ConversationManager;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    type Log = Arc<Mutex<Vec<String>>>;

    /// Plays back one scripted stream per request.
    struct ScriptedClient {
        scripts: Mutex<VecDeque<Vec<Result<CompletionChunk>>>>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(scripts: Vec<Vec<Result<CompletionChunk>>>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn stream(&self, _request: CompletionRequest) -> Result<ChunkReceiver> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| CordError::Transport("no script".into()))?;
            let (tx, rx) = mpsc::channel(script.len().max(1));
            for chunk in script {
                tx.try_send(chunk).unwrap();
            }
            Ok(rx)
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    struct LogHandle {
        id: String,
        log: Log,
        /// Time each edit takes after it lands
        settle: Duration,
    }

    #[async_trait]
    impl ReplyHandle for LogHandle {
        fn id(&self) -> &str {
            &self.id
        }
        async fn edit(&self, text: &str) -> Result<()> {
            self.log.lock().unwrap().push(format!("edit {}: {}", self.id, text));
            if !self.settle.is_zero() {
                tokio::time::sleep(self.settle).await;
            }
            Ok(())
        }
        async fn delete(&self) -> Result<()> {
            self.log.lock().unwrap().push(format!("delete {}", self.id));
            Ok(())
        }
    }

    struct LogChannel {
        log: Log,
        next: AtomicUsize,
        settle: Duration,
    }

    #[async_trait]
    impl MessageChannel for LogChannel {
        async fn send(&self, text: &str) -> Result<Arc<dyn ReplyHandle>> {
            let id = format!("r{}", self.next.fetch_add(1, Ordering::SeqCst));
            self.log.lock().unwrap().push(format!("send {}: {}", id, text));
            Ok(Arc::new(LogHandle {
                id,
                log: Arc::clone(&self.log),
                settle: self.settle,
            }))
        }
    }

    struct FixedOpener {
        log: Log,
        settle: Duration,
    }

    #[async_trait]
    impl ConversationOpener for FixedOpener {
        async fn open(&self, _msg: &InboundMessage) -> Result<Option<OpenedConversation>> {
            Ok(Some(OpenedConversation {
                conversation_id: "thread-1".into(),
                in_thread: true,
                channel: Arc::new(LogChannel {
                    log: Arc::clone(&self.log),
                    next: AtomicUsize::new(0),
                    settle: self.settle,
                }),
            }))
        }
    }

    fn fixture(
        scripts: Vec<Vec<Result<CompletionChunk>>>,
    ) -> (ConversationLoop, Arc<ScriptedClient>, Arc<ConversationManager>, Log) {
        fixture_with_settle(scripts, Duration::ZERO)
    }

    fn fixture_with_settle(
        scripts: Vec<Vec<Result<CompletionChunk>>>,
        settle: Duration,
    ) -> (ConversationLoop, Arc<ScriptedClient>, Arc<ConversationManager>, Log) {
        let log: Log = Arc::default();
        let client = Arc::new(ScriptedClient::new(scripts));
        let store = Arc::new(ConversationManager::new_memory());
        let agent = ConversationLoop::new(
            client.clone(),
            store.clone(),
            Arc::new(FixedOpener {
                log: log.clone(),
                settle,
            }),
        )
        .with_reply_config(ReplyConfig {
            chunk_size: 2000,
            flush_interval_ms: 5,
            edit_interval_ms: 0,
        });
        (agent, client, store, log)
    }

    fn inbound(content: &str) -> InboundMessage {
        InboundMessage::new("discord", "u1", "c1", content)
            .with_sender_name("alice")
            .with_message_id("m1")
    }

    #[tokio::test]
    async fn test_plain_answer_persists_history() {
        let (agent, _, store, log) = fixture(vec![vec![
            Ok(CompletionChunk::content("Hi ")),
            Ok(CompletionChunk::content("there")),
            Ok(CompletionChunk::finish(FinishReason::Stop)),
        ]]);

        let outcome = agent.process_message(&inbound("hello")).await.unwrap();
        assert_eq!(
            outcome,
            TurnOutcome::Completed {
                content: "Hi there".into(),
                replies: 1,
                tool_rounds: 0
            }
        );

        let record = store.get_or_create("thread-1", "u1").await.unwrap();
        assert!(!record.loading);
        assert_eq!(record.messages.len(), 2);
        assert_eq!(record.messages[0].name.as_deref(), Some("alice-u1"));
        assert_eq!(record.messages[1].content, "Hi there");

        let log = log.lock().unwrap();
        assert_eq!(log[0], "send r0: <@u1> loading...");
        assert_eq!(log.last().unwrap(), "edit r0: Hi there");
    }

    #[tokio::test]
    async fn test_busy_rejected_without_completion_call() {
        let (agent, client, store, log) = fixture(vec![]);
        assert!(matches!(
            store.try_acquire("thread-1", "u1").await.unwrap(),
            Acquire::Locked(_)
        ));

        let outcome = agent.process_message(&inbound("hello")).await.unwrap();
        assert_eq!(outcome, TurnOutcome::Rejected(Rejection::Busy));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert_eq!(log.lock().unwrap().last().unwrap(), "edit r0: Something is running");
    }

    #[tokio::test]
    async fn test_owner_mismatch_rejected() {
        let (agent, client, store, log) = fixture(vec![]);
        store
            .persist("thread-1", vec![], "someone-else")
            .await
            .unwrap();

        let outcome = agent.process_message(&inbound("hello")).await.unwrap();
        assert!(matches!(
            outcome,
            TurnOutcome::Rejected(Rejection::OwnerMismatch { .. })
        ));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            log.lock().unwrap().last().unwrap(),
            "edit r0: Another request is running"
        );
    }

    #[tokio::test]
    async fn test_transport_error_keeps_lock() {
        let (agent, _, store, log) = fixture(vec![vec![
            Ok(CompletionChunk::content("par")),
            Err(CordError::Transport("connection reset".into())),
        ]]);

        let outcome = agent.process_message(&inbound("hello")).await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Failed { .. }));
        assert_eq!(
            log.lock().unwrap().last().unwrap(),
            "edit r0: ```Transport error: connection reset```"
        );
        assert!(matches!(
            store.try_acquire("thread-1", "u1").await.unwrap(),
            Acquire::Busy
        ));
    }

    #[tokio::test]
    async fn test_empty_content_releases_lock() {
        let (agent, _, store, log) = fixture(vec![vec![Ok(CompletionChunk::finish(
            FinishReason::Stop,
        ))]]);

        let outcome = agent.process_message(&inbound("hello")).await.unwrap();
        assert_eq!(outcome, TurnOutcome::NoResponse);
        assert_eq!(log.lock().unwrap().last().unwrap(), "edit r0: No response");

        let record = store.get_or_create("thread-1", "u1").await.unwrap();
        assert!(!record.loading);
        assert!(record.messages.is_empty());
    }

    #[tokio::test]
    async fn test_max_tool_rounds_stops_dispatch() {
        let call = || {
            Ok(CompletionChunk::tool_call(
                0,
                Some("c1"),
                Some("execute_math_expression"),
                Some(r#"{"expression":"1+1"}"#),
            ))
        };
        let (agent, client, _, _) = fixture(vec![
            vec![call(), Ok(CompletionChunk::finish(FinishReason::ToolCalls))],
            vec![
                Ok(CompletionChunk::content("again")),
                call(),
                Ok(CompletionChunk::finish(FinishReason::ToolCalls)),
            ],
        ]);
        let agent = agent.with_limits(ConversationConfig {
            storage_dir: None,
            max_tool_rounds: Some(1),
            ..Default::default()
        });

        let outcome = agent.process_message(&inbound("loop")).await.unwrap();
        assert_eq!(
            outcome,
            TurnOutcome::Completed {
                content: "again".into(),
                replies: 1,
                tool_rounds: 1
            }
        );
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_preview_never_overwrites_tool_notice() {
        let (agent, _, _, log) = fixture_with_settle(
            vec![
                vec![
                    Ok(CompletionChunk::content("checking...")),
                    Ok(CompletionChunk::tool_call(
                        0,
                        Some("call_1"),
                        Some("execute_math_expression"),
                        Some(r#"{"expression":"2+2"}"#),
                    )),
                    Ok(CompletionChunk::finish(FinishReason::ToolCalls)),
                ],
                vec![
                    Ok(CompletionChunk::content("4")),
                    Ok(CompletionChunk::finish(FinishReason::Stop)),
                ],
            ],
            Duration::from_millis(20),
        );

        let outcome = agent.process_message(&inbound("2+2?")).await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Completed { tool_rounds: 1, .. }));

        let log = log.lock().unwrap();
        assert!(log[1].starts_with("edit r0: Using tools:"), "{:?}", *log);
        assert!(
            !log.iter().any(|op| op == "edit r0: checking..."),
            "stale preview after tool notice: {:?}",
            *log
        );
        assert_eq!(log.last().unwrap(), "edit r0: 4");
    }

    #[test]
    fn test_tool_notice_truncated() {
        let calls = vec![ToolCall::new("c1", "x", &"a".repeat(3000))];
        let notice = tool_notice(&calls);
        assert!(notice.starts_with("Using tools: ```[{"));
        assert_eq!(notice.chars().count(), TOOL_NOTICE_LIMIT);
    }
}
