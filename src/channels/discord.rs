//! Discord channel implementation.
//!
//! Connects to Discord via the Gateway WebSocket API (v10) for inbound messages
//! and uses the REST API for replies, threads and the lookups behind the
//! Discord tools. Uses raw `tokio-tungstenite` and `reqwest` -- no Discord SDK
//! crate required.
//!
//! # Gateway flow
//!
//! 1. GET `https://discord.com/api/v10/gateway` to obtain the WebSocket URL.
//! 2. Connect via `tokio-tungstenite`.
//! 3. Receive opcode 10 (HELLO) -- extract `heartbeat_interval`.
//! 4. Send opcode 2 (IDENTIFY) with bot token and intents.
//! 5. Start a periodic heartbeat task (opcode 1).
//! 6. Track `READY` (bot user) and `GUILD_CREATE` (preferred locale), and
//!    publish every `MESSAGE_CREATE` that mentions the bot.
//! 7. Reconnect with exponential backoff on disconnection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::{Method, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::bus::{InboundMessage, MessageBus};
use crate::config::DiscordConfig;
use crate::error::{CordError, Result};
use crate::utils::string::prefix_chars;

use super::{
    BaseChannelConfig, Channel, ConversationOpener, DiscordApi, MessageChannel,
    OpenedConversation, ReplyHandle,
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Maximum reconnect delay (in seconds) for exponential backoff.
const MAX_RECONNECT_DELAY_SECS: u64 = 120;
/// Base reconnect delay (in seconds).
const BASE_RECONNECT_DELAY_SECS: u64 = 2;
/// Maximum number of consecutive reconnect attempts before the delay stops growing.
const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Discord Gateway intents bitmask.
/// GUILDS (1 << 0) | GUILD_MESSAGES (1 << 9) | MESSAGE_CONTENT (1 << 15)
const GATEWAY_INTENTS: u64 = (1 << 0) | (1 << 9) | (1 << 15);

/// Discord message content length limit.
const DISCORD_MAX_MESSAGE_LENGTH: usize = 2000;

/// Fallback heartbeat interval when HELLO carries none.
const DEFAULT_HEARTBEAT_MS: u64 = 41250;

/// Reply when the bot cannot open a thread for a conversation.
pub const THREAD_PERMISSION_NOTICE: &str = "Bot don't have permission to create thread";

// ---------------------------------------------------------------------------
// Gateway payload types (deserialization)
// ---------------------------------------------------------------------------

/// Top-level Discord Gateway payload.
#[derive(Debug, Deserialize)]
struct GatewayPayload {
    op: u8,
    #[serde(default)]
    d: Option<Value>,
    #[serde(default)]
    s: Option<u64>,
    /// Event name (only present for opcode 0 / DISPATCH).
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HelloData {
    heartbeat_interval: u64,
}

/// The `d` field of a MESSAGE_CREATE dispatch event.
#[derive(Debug, Deserialize)]
struct MessageCreateData {
    id: String,
    #[serde(default)]
    content: String,
    channel_id: String,
    #[serde(default)]
    guild_id: Option<String>,
    author: MessageAuthor,
    #[serde(default)]
    mentions: Vec<MentionedUser>,
}

#[derive(Debug, Deserialize)]
struct MessageAuthor {
    id: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    bot: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct MentionedUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GuildCreateData {
    id: String,
    #[serde(default)]
    preferred_locale: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    url: String,
}

/// Channel types that are threads (announcement, public, private).
fn is_thread_type(channel: &Value) -> bool {
    matches!(channel.get("type").and_then(Value::as_u64), Some(10..=12))
}

/// Guild text and announcement channels can host threads.
fn can_host_thread(channel: &Value) -> bool {
    matches!(channel.get("type").and_then(Value::as_u64), Some(0) | Some(5))
}

// ---------------------------------------------------------------------------
// REST client
// ---------------------------------------------------------------------------

/// Thin Discord REST client authenticated as the bot.
pub struct DiscordRest {
    client: reqwest::Client,
    token: String,
    api_base: String,
}

impl DiscordRest {
    pub fn new(token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.trim().to_string(),
            api_base: DISCORD_API_BASE.to_string(),
        }
    }

    /// Point at another API root (proxies, tests).
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    /// Build an endpoint URL; each segment is percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| CordError::Config(format!("Invalid Discord API base: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| CordError::Config("Discord API base cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn request(&self, method: Method, url: Url, body: Option<&Value>) -> Result<Value> {
        let mut request = self
            .client
            .request(method, url)
            .header("Authorization", format!("Bot {}", self.token));
        request = match body {
            Some(body) => request.json(body),
            // Discord rejects body-less PUTs without a Content-Length
            None => request.body(Vec::new()),
        };

        let response = request
            .send()
            .await
            .map_err(|e| CordError::Channel(format!("Failed to call Discord API: {}", e)))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            CordError::Channel(format!("Failed to read Discord API response: {}", e))
        })?;

        if !status.is_success() {
            return Err(CordError::Channel(format!(
                "Discord API returned HTTP {}: {}",
                status, text
            )));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn get(&self, segments: &[&str]) -> Result<Value> {
        self.request(Method::GET, self.endpoint(segments)?, None).await
    }

    /// Body for a message POST, truncated to Discord's limit.
    fn build_message_payload(content: &str, reply_to: Option<&str>) -> Value {
        let mut payload = json!({ "content": prefix_chars(content, DISCORD_MAX_MESSAGE_LENGTH) });
        if let Some(reply_id) = reply_to {
            payload["message_reference"] = json!({ "message_id": reply_id });
        }
        payload
    }

    /// Post a message and return its id.
    pub async fn create_message(
        &self,
        channel_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> Result<String> {
        let payload = Self::build_message_payload(content, reply_to);
        let url = self.endpoint(&["channels", channel_id, "messages"])?;
        let message = self.request(Method::POST, url, Some(&payload)).await?;
        message
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CordError::Channel("Discord message response missing id".to_string()))
    }

    pub async fn edit_message(&self, channel_id: &str, message_id: &str, content: &str) -> Result<()> {
        let payload = json!({ "content": prefix_chars(content, DISCORD_MAX_MESSAGE_LENGTH) });
        let url = self.endpoint(&["channels", channel_id, "messages", message_id])?;
        self.request(Method::PATCH, url, Some(&payload)).await?;
        Ok(())
    }

    pub async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<()> {
        let url = self.endpoint(&["channels", channel_id, "messages", message_id])?;
        self.request(Method::DELETE, url, None).await?;
        Ok(())
    }

    /// Start a public thread from a message and return the thread id.
    pub async fn start_thread(
        &self,
        channel_id: &str,
        message_id: &str,
        name: &str,
        auto_archive_minutes: u32,
    ) -> Result<String> {
        let payload = json!({
            "name": name,
            "auto_archive_duration": auto_archive_minutes,
        });
        let url = self.endpoint(&["channels", channel_id, "messages", message_id, "threads"])?;
        let thread = self.request(Method::POST, url, Some(&payload)).await?;
        thread
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CordError::Channel("Discord thread response missing id".to_string()))
    }
}

#[async_trait]
impl DiscordApi for DiscordRest {
    async fn get_user(&self, user_id: &str) -> Result<Value> {
        self.get(&["users", user_id]).await
    }

    async fn get_channel(&self, channel_id: &str) -> Result<Value> {
        self.get(&["channels", channel_id]).await
    }

    async fn get_guild(&self, guild_id: &str) -> Result<Value> {
        self.get(&["guilds", guild_id]).await
    }

    async fn get_message(&self, channel_id: &str, message_id: &str) -> Result<Value> {
        self.get(&["channels", channel_id, "messages", message_id]).await
    }

    async fn get_voice_state(&self, guild_id: &str, user_id: &str) -> Result<Value> {
        self.get(&["guilds", guild_id, "voice-states", user_id]).await
    }

    async fn send_embed(&self, channel_id: &str, embed: &Value) -> Result<Value> {
        let url = self.endpoint(&["channels", channel_id, "messages"])?;
        self.request(Method::POST, url, Some(&json!({ "embeds": [embed] })))
            .await
    }

    async fn add_reaction(&self, channel_id: &str, message_id: &str, emoji: &str) -> Result<()> {
        let url = self.endpoint(&[
            "channels",
            channel_id,
            "messages",
            message_id,
            "reactions",
            emoji,
            "@me",
        ])?;
        self.request(Method::PUT, url, None).await?;
        Ok(())
    }

    async fn rename_channel(&self, channel_id: &str, name: &str) -> Result<Value> {
        let url = self.endpoint(&["channels", channel_id])?;
        self.request(Method::PATCH, url, Some(&json!({ "name": name })))
            .await
    }
}

// ---------------------------------------------------------------------------
// Reply channel
// ---------------------------------------------------------------------------

/// A posted Discord message.
pub struct DiscordReplyHandle {
    rest: Arc<DiscordRest>,
    channel_id: String,
    message_id: String,
}

#[async_trait]
impl ReplyHandle for DiscordReplyHandle {
    fn id(&self) -> &str {
        &self.message_id
    }

    async fn edit(&self, text: &str) -> Result<()> {
        self.rest
            .edit_message(&self.channel_id, &self.message_id, text)
            .await
    }

    async fn delete(&self) -> Result<()> {
        self.rest
            .delete_message(&self.channel_id, &self.message_id)
            .await
    }
}

/// Sends into one channel, optionally as replies to one message.
///
/// A chained channel has no target until its first send; every later send
/// replies to that first message.
pub struct DiscordReplyChannel {
    rest: Arc<DiscordRest>,
    channel_id: String,
    reply_to: OnceLock<String>,
    chain: bool,
}

impl DiscordReplyChannel {
    pub fn new(rest: Arc<DiscordRest>, channel_id: &str) -> Self {
        Self {
            rest,
            channel_id: channel_id.to_string(),
            reply_to: OnceLock::new(),
            chain: false,
        }
    }

    pub fn replying_to(self, message_id: &str) -> Self {
        let _ = self.reply_to.set(message_id.to_string());
        self
    }

    /// Reply to whatever this channel sends first.
    pub fn chained(mut self) -> Self {
        self.chain = true;
        self
    }

    /// Message the next send replies to.
    pub fn reply_target(&self) -> Option<&str> {
        self.reply_to.get().map(String::as_str)
    }

    fn record_sent(&self, message_id: &str) {
        if self.chain {
            let _ = self.reply_to.set(message_id.to_string());
        }
    }
}

#[async_trait]
impl MessageChannel for DiscordReplyChannel {
    async fn send(&self, text: &str) -> Result<Arc<dyn ReplyHandle>> {
        let message_id = self
            .rest
            .create_message(&self.channel_id, text, self.reply_target())
            .await?;
        self.record_sent(&message_id);
        Ok(Arc::new(DiscordReplyHandle {
            rest: Arc::clone(&self.rest),
            channel_id: self.channel_id.clone(),
            message_id,
        }))
    }
}

// ---------------------------------------------------------------------------
// Conversation routing
// ---------------------------------------------------------------------------

/// One thread per conversation.
///
/// A message inside a thread continues that thread's conversation; any other
/// message opens a new thread from itself.
pub struct DiscordOpener {
    rest: Arc<DiscordRest>,
    thread_name: String,
    auto_archive_minutes: u32,
}

impl DiscordOpener {
    pub fn new(rest: Arc<DiscordRest>, config: &DiscordConfig) -> Self {
        Self {
            rest,
            thread_name: config.thread_name.clone(),
            auto_archive_minutes: config.thread_auto_archive_minutes,
        }
    }
}

#[async_trait]
impl ConversationOpener for DiscordOpener {
    async fn open(&self, msg: &InboundMessage) -> Result<Option<OpenedConversation>> {
        let channel = self.rest.get_channel(&msg.chat_id).await?;

        if is_thread_type(&channel) {
            let reply = DiscordReplyChannel::new(Arc::clone(&self.rest), &msg.chat_id)
                .replying_to(&msg.message_id);
            return Ok(Some(OpenedConversation {
                conversation_id: msg.chat_id.clone(),
                in_thread: true,
                channel: Arc::new(reply),
            }));
        }

        if msg.guild_id.is_some() && can_host_thread(&channel) {
            match self
                .rest
                .start_thread(
                    &msg.chat_id,
                    &msg.message_id,
                    &self.thread_name,
                    self.auto_archive_minutes,
                )
                .await
            {
                Ok(thread_id) => {
                    debug!(thread_id = %thread_id, "Discord: opened conversation thread");
                    let reply =
                        DiscordReplyChannel::new(Arc::clone(&self.rest), &thread_id).chained();
                    return Ok(Some(OpenedConversation {
                        conversation_id: thread_id,
                        in_thread: true,
                        channel: Arc::new(reply),
                    }));
                }
                Err(e) => warn!(channel_id = %msg.chat_id, "Discord: failed to start thread: {}", e),
            }
        }

        self.rest
            .create_message(&msg.chat_id, THREAD_PERMISSION_NOTICE, Some(&msg.message_id))
            .await?;
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// DiscordChannel
// ---------------------------------------------------------------------------

/// Discord Gateway connection publishing mentions to the message bus.
pub struct DiscordChannel {
    config: DiscordConfig,
    base_config: BaseChannelConfig,
    bus: Arc<MessageBus>,
    running: Arc<AtomicBool>,
    shutdown_tx: Option<watch::Sender<bool>>,
    bot_user_tx: watch::Sender<Option<Value>>,
    http_client: reqwest::Client,
}

impl DiscordChannel {
    pub fn new(config: DiscordConfig, bus: Arc<MessageBus>) -> Self {
        let base_config = BaseChannelConfig::with_allowlist("discord", config.allow_from.clone());
        let (bot_user_tx, _) = watch::channel(None);

        Self {
            config,
            base_config,
            bus,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx: None,
            bot_user_tx,
            http_client: reqwest::Client::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// The bot's user object, filled in once the gateway is READY.
    pub fn bot_user(&self) -> watch::Receiver<Option<Value>> {
        self.bot_user_tx.subscribe()
    }

    async fn fetch_gateway_url(client: &reqwest::Client, token: &str) -> Result<String> {
        let response = client
            .get(format!("{}/gateway", DISCORD_API_BASE))
            .header("Authorization", format!("Bot {}", token))
            .send()
            .await
            .map_err(|e| {
                CordError::Channel(format!("Failed to fetch Discord Gateway URL: {}", e))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            CordError::Channel(format!("Failed to read Discord Gateway response: {}", e))
        })?;

        if !status.is_success() {
            return Err(CordError::Channel(format!(
                "Discord Gateway HTTP {}: {}",
                status, body
            )));
        }

        let parsed: GatewayResponse = serde_json::from_str(&body).map_err(|e| {
            CordError::Channel(format!("Invalid Discord Gateway response JSON: {}", e))
        })?;

        let url = parsed.url.trim();
        if url.is_empty() {
            return Err(CordError::Channel(
                "Discord Gateway response missing URL".to_string(),
            ));
        }
        Ok(format!("{}/?v=10&encoding=json", url))
    }

    fn build_identify_payload(token: &str) -> String {
        json!({
            "op": 2,
            "d": {
                "token": token,
                "intents": GATEWAY_INTENTS,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "zeptocord",
                    "device": "zeptocord"
                }
            }
        })
        .to_string()
    }

    fn build_heartbeat_payload(sequence: Option<u64>) -> String {
        json!({ "op": 1, "d": sequence }).to_string()
    }

    fn extract_heartbeat_interval(data: &Value) -> Result<u64> {
        let hello: HelloData = serde_json::from_value(data.clone())
            .map_err(|e| CordError::Channel(format!("Invalid Discord HELLO payload: {}", e)))?;
        Ok(hello.heartbeat_interval)
    }

    /// Turn a MESSAGE_CREATE event into an `InboundMessage`.
    ///
    /// Returns `None` for bot authors, messages that do not mention the bot,
    /// and users outside the allowlist.
    fn parse_message_create(
        data: &Value,
        bot_user_id: Option<&str>,
        base_config: &BaseChannelConfig,
        locales: &HashMap<String, String>,
    ) -> Option<InboundMessage> {
        let msg: MessageCreateData = serde_json::from_value(data.clone()).ok()?;

        if msg.author.bot.unwrap_or(false) {
            return None;
        }

        let bot_user_id = bot_user_id?;
        if !msg.mentions.iter().any(|m| m.id == bot_user_id) {
            return None;
        }

        let sender_id = msg.author.id.trim();
        if sender_id.is_empty() || msg.channel_id.trim().is_empty() {
            return None;
        }
        if !base_config.is_allowed(sender_id) {
            info!("Discord: user {} not in allowlist, ignoring message", sender_id);
            return None;
        }

        let mut inbound = InboundMessage::new("discord", sender_id, msg.channel_id.trim(), &msg.content)
            .with_sender_name(&msg.author.username)
            .with_message_id(&msg.id)
            .with_raw(data.clone());
        if let Some(guild_id) = msg.guild_id.as_deref() {
            inbound = inbound.with_guild(guild_id);
            if let Some(locale) = locales.get(guild_id) {
                inbound = inbound.with_locale(locale);
            }
        }
        Some(inbound)
    }

    fn backoff_delay(attempt: u32) -> Duration {
        let delay_secs = BASE_RECONNECT_DELAY_SECS
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(MAX_RECONNECT_DELAY_SECS);
        Duration::from_secs(delay_secs)
    }

    /// Sleep out the backoff. Returns `false` if shutdown arrived first.
    async fn wait_backoff(attempt: &mut u32, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
        let delay = Self::backoff_delay(*attempt);
        *attempt = (*attempt + 1).min(MAX_RECONNECT_ATTEMPTS);
        info!("Discord: reconnecting in {} seconds", delay.as_secs());
        tokio::select! {
            _ = shutdown_rx.changed() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Main gateway loop: connects, identifies, heartbeats, and dispatches.
    /// Reconnects with exponential backoff on any disconnect.
    async fn run_gateway_loop(
        client: reqwest::Client,
        token: String,
        bus: Arc<MessageBus>,
        base_config: BaseChannelConfig,
        bot_user_tx: watch::Sender<Option<Value>>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut reconnect_attempt: u32 = 0;
        let mut bot_user_id: Option<String> = None;
        let mut locales: HashMap<String, String> = HashMap::new();

        loop {
            if *shutdown_rx.borrow() {
                info!("Discord gateway shutdown requested");
                return;
            }

            // --- Fetch gateway URL ---
            let ws_url = tokio::select! {
                _ = shutdown_rx.changed() => return,
                result = Self::fetch_gateway_url(&client, &token) => match result {
                    Ok(url) => url,
                    Err(e) => {
                        warn!("Discord: failed to fetch gateway URL: {}", e);
                        if Self::wait_backoff(&mut reconnect_attempt, &mut shutdown_rx).await {
                            continue;
                        }
                        return;
                    }
                },
            };

            // --- WebSocket connect ---
            let ws_stream = tokio::select! {
                _ = shutdown_rx.changed() => return,
                result = connect_async(&ws_url) => match result {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        warn!("Discord: WebSocket connect failed: {}", e);
                        if Self::wait_backoff(&mut reconnect_attempt, &mut shutdown_rx).await {
                            continue;
                        }
                        return;
                    }
                },
            };

            info!("Discord gateway WebSocket connected");
            reconnect_attempt = 0;
            let (mut ws_writer, mut ws_reader) = ws_stream.split();

            // --- Wait for HELLO (opcode 10) ---
            let heartbeat_interval = loop {
                let next = tokio::select! {
                    _ = shutdown_rx.changed() => return,
                    msg = ws_reader.next() => msg,
                };
                match next {
                    Some(Ok(WsMessage::Text(raw))) => {
                        match serde_json::from_str::<GatewayPayload>(&raw) {
                            Ok(payload) if payload.op == 10 => {
                                break payload
                                    .d
                                    .as_ref()
                                    .and_then(|d| Self::extract_heartbeat_interval(d).ok())
                                    .unwrap_or(DEFAULT_HEARTBEAT_MS);
                            }
                            Ok(_) => debug!("Discord: ignoring pre-HELLO payload"),
                            Err(e) => debug!("Discord: failed to parse pre-HELLO payload: {}", e),
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Discord: WebSocket error waiting for HELLO: {}", e);
                        break 0;
                    }
                    None => {
                        warn!("Discord: WebSocket closed before HELLO");
                        break 0;
                    }
                }
            };

            if heartbeat_interval == 0 {
                if Self::wait_backoff(&mut reconnect_attempt, &mut shutdown_rx).await {
                    continue;
                }
                return;
            }
            debug!(heartbeat_interval, "Discord HELLO received");

            // --- Send IDENTIFY (opcode 2) ---
            let identify = Self::build_identify_payload(&token);
            if let Err(e) = ws_writer.send(WsMessage::Text(identify.into())).await {
                warn!("Discord: failed to send IDENTIFY: {}", e);
                if Self::wait_backoff(&mut reconnect_attempt, &mut shutdown_rx).await {
                    continue;
                }
                return;
            }

            // --- Spawn heartbeat task ---
            let sequence = Arc::new(AtomicU64::new(0));
            let sequence_valid = Arc::new(AtomicBool::new(false));
            let (heartbeat_tx, mut heartbeat_rx) = tokio::sync::mpsc::channel::<String>(16);

            tokio::spawn({
                let mut shutdown = shutdown_rx.clone();
                let sequence = Arc::clone(&sequence);
                let sequence_valid = Arc::clone(&sequence_valid);
                async move {
                    let interval = Duration::from_millis(heartbeat_interval);
                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => return,
                            _ = tokio::time::sleep(interval) => {
                                let s = sequence_valid
                                    .load(Ordering::SeqCst)
                                    .then(|| sequence.load(Ordering::SeqCst));
                                if heartbeat_tx.send(Self::build_heartbeat_payload(s)).await.is_err() {
                                    debug!("Discord heartbeat channel closed");
                                    return;
                                }
                            }
                        }
                    }
                }
            });

            // --- Main dispatch loop ---
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        info!("Discord gateway shutdown requested");
                        return;
                    }

                    hb = heartbeat_rx.recv() => match hb {
                        Some(payload) => {
                            if let Err(e) = ws_writer.send(WsMessage::Text(payload.into())).await {
                                warn!("Discord: heartbeat send failed: {}", e);
                                break;
                            }
                        }
                        None => break,
                    },

                    msg = ws_reader.next() => match msg {
                        Some(Ok(WsMessage::Text(raw))) => {
                            let payload = match serde_json::from_str::<GatewayPayload>(&raw) {
                                Ok(payload) => payload,
                                Err(e) => {
                                    debug!("Discord: failed to parse gateway payload: {}", e);
                                    continue;
                                }
                            };
                            if let Some(s) = payload.s {
                                sequence.store(s, Ordering::SeqCst);
                                sequence_valid.store(true, Ordering::SeqCst);
                            }

                            match payload.op {
                                // DISPATCH
                                0 => {
                                    let Some(data) = payload.d.as_ref() else { continue };
                                    match payload.t.as_deref() {
                                        Some("READY") => {
                                            let user = data.get("user").cloned();
                                            bot_user_id = user
                                                .as_ref()
                                                .and_then(|u| u.get("id"))
                                                .and_then(Value::as_str)
                                                .map(str::to_string);
                                            info!(bot_user_id = ?bot_user_id, "Discord gateway READY");
                                            bot_user_tx.send_replace(user);
                                        }
                                        Some("GUILD_CREATE") => {
                                            if let Ok(guild) = serde_json::from_value::<GuildCreateData>(data.clone()) {
                                                if let Some(locale) = guild.preferred_locale {
                                                    locales.insert(guild.id, locale);
                                                }
                                            }
                                        }
                                        Some("MESSAGE_CREATE") => {
                                            if let Some(inbound) = Self::parse_message_create(
                                                data,
                                                bot_user_id.as_deref(),
                                                &base_config,
                                                &locales,
                                            ) {
                                                if let Err(e) = bus.publish_inbound(inbound).await {
                                                    error!("Failed to publish Discord inbound message: {}", e);
                                                }
                                            }
                                        }
                                        Some(other) => debug!("Discord: ignoring event {}", other),
                                        None => {}
                                    }
                                }
                                // HEARTBEAT request from server
                                1 => {
                                    let s = sequence_valid
                                        .load(Ordering::SeqCst)
                                        .then(|| sequence.load(Ordering::SeqCst));
                                    let hb = Self::build_heartbeat_payload(s);
                                    if let Err(e) = ws_writer.send(WsMessage::Text(hb.into())).await {
                                        warn!("Discord: heartbeat response send failed: {}", e);
                                        break;
                                    }
                                }
                                7 => {
                                    info!("Discord: server requested reconnect");
                                    break;
                                }
                                9 => {
                                    warn!("Discord: invalid session, reconnecting");
                                    break;
                                }
                                11 => debug!("Discord: heartbeat ACK received"),
                                op => debug!("Discord: unhandled opcode {}", op),
                            }
                        }
                        Some(Ok(WsMessage::Ping(payload))) => {
                            if let Err(e) = ws_writer.send(WsMessage::Pong(payload)).await {
                                warn!("Discord: pong send failed: {}", e);
                                break;
                            }
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            info!("Discord: WebSocket closed by server: {:?}", frame);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("Discord: WebSocket stream error: {}", e);
                            break;
                        }
                        None => {
                            warn!("Discord: WebSocket stream ended");
                            break;
                        }
                    },
                }
            }

            if !Self::wait_backoff(&mut reconnect_attempt, &mut shutdown_rx).await {
                return;
            }
        }
    }
}

#[async_trait]
impl Channel for DiscordChannel {
    fn name(&self) -> &str {
        "discord"
    }

    async fn start(&mut self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            info!("Discord channel already running");
            return Ok(());
        }

        if !self.config.enabled {
            warn!("Discord channel is disabled in configuration");
            self.running.store(false, Ordering::SeqCst);
            return Ok(());
        }

        let token = self.config.token.trim().to_string();
        if token.is_empty() {
            self.running.store(false, Ordering::SeqCst);
            return Err(CordError::Config("Discord bot token is empty".to_string()));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown_tx = Some(shutdown_tx);

        info!("Starting Discord channel with Gateway WebSocket");
        tokio::spawn(Self::run_gateway_loop(
            self.http_client.clone(),
            token,
            Arc::clone(&self.bus),
            self.base_config.clone(),
            self.bot_user_tx.clone(),
            shutdown_rx,
        ));

        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            info!("Discord channel already stopped");
            return Ok(());
        }
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        info!("Discord channel stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn is_allowed(&self, user_id: &str) -> bool {
        self.base_config.is_allowed(user_id)
    }
}
