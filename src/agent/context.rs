//! Context builder for chat turns
//!
//! Builds the system prompt sent ahead of a conversation's history. The
//! prompt carries the current time, the guild's preferred locale and JSON
//! snapshots of the bot user and the triggering message.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::session::Message;

/// Locale used when the guild has none (direct messages).
pub const DEFAULT_LOCALE: &str = "en-US";

const GUIDELINES: &str = r#"You are a helpful and concise AI assistant operating as a Discord bot.
When you do respond:
- Be concise, relevant, and friendly.
- Use markdown formatting if needed.
- Follow the platform's tone: informal, polite, and community-friendly.
- If you don't know the answer, say so honestly.
- You should use the tools to make sure your answer is correct.
- Retry your answer with the tools.
- If a tool errors, retry it up to 5 times; if it still fails, respond with "I'm sorry, I can't answer that right now."

Remember: Only respond to messages that directly mention you."#;

/// Builder for the system prompt of one turn.
///
/// # Example
///
/// ```rust
/// use zeptocord::agent::ContextBuilder;
///
/// let prompt = ContextBuilder::new().with_locale(Some("vi")).build_system_prompt();
/// assert!(prompt.contains("Your preferred locale is vi."));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    locale: Option<String>,
    bot_user: Option<Value>,
    message: Option<Value>,
    now: Option<DateTime<Utc>>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_locale(mut self, locale: Option<&str>) -> Self {
        self.locale = locale.filter(|l| !l.is_empty()).map(str::to_string);
        self
    }

    pub fn with_bot_user(mut self, user: Option<Value>) -> Self {
        self.bot_user = user;
        self
    }

    pub fn with_message(mut self, message: Option<Value>) -> Self {
        self.message = message;
        self
    }

    /// Pin the clock; defaults to now.
    pub fn with_time(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn build_system_prompt(&self) -> String {
        let now = self.now.unwrap_or_else(Utc::now);
        let locale = self.locale.as_deref().unwrap_or(DEFAULT_LOCALE);

        format!(
            "CURRENT TIME IS {}\n\
             JUST RESPOND IN SHORT FORM ABOUT 2000 CHARACTERS OR LESS SO TRY TO BE SHORT AND TO THE POINT.\n\
             Your preferred locale is {}.\n\
             {}\n\n\
             The context of the message is:\n\
             Your User Info: {}\n\
             Message: {}",
            now.to_rfc3339_opts(SecondsFormat::Millis, true),
            locale,
            GUIDELINES,
            pretty(self.bot_user.as_ref()),
            pretty(self.message.as_ref()),
        )
    }

    pub fn build_system_message(&self) -> Message {
        Message::system(&self.build_system_prompt())
    }

    /// System message followed by `history`.
    pub fn build_messages(&self, history: &[Message]) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(self.build_system_message());
        messages.extend_from_slice(history);
        messages
    }
}

fn pretty(value: Option<&Value>) -> String {
    value
        .and_then(|v| serde_json::to_string_pretty(v).ok())
        .unwrap_or_else(|| "null".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_default_locale_and_time() {
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let prompt = ContextBuilder::new().with_time(now).build_system_prompt();
        assert!(prompt.starts_with("CURRENT TIME IS 2025-01-02T03:04:05.000Z"));
        assert!(prompt.contains("Your preferred locale is en-US."));
        assert!(prompt.contains("Only respond to messages that directly mention you"));
        assert!(prompt.ends_with("Message: null"));
    }

    #[test]
    fn test_empty_locale_falls_back() {
        let prompt = ContextBuilder::new().with_locale(Some("")).build_system_prompt();
        assert!(prompt.contains("Your preferred locale is en-US."));
    }

    #[test]
    fn test_json_context() {
        let prompt = ContextBuilder::new()
            .with_bot_user(Some(json!({"id": "999", "username": "bot"})))
            .with_message(Some(json!({"id": "m1"})))
            .build_system_prompt();
        assert!(prompt.contains("\"username\": \"bot\""));
        assert!(prompt.contains("\"id\": \"m1\""));
    }

    #[test]
    fn test_build_messages_prepends_system() {
        let history = vec![Message::user("hi"), Message::assistant("hello")];
        let messages = ContextBuilder::new().build_messages(&history);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, crate::session::Role::System);
        assert_eq!(messages[2].content, "hello");
    }
}
