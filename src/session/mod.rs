//! Conversation store - persisted per-conversation history and turn lock
//!
//! Each conversation (one Discord thread) has a [`ConversationRecord`] holding
//! its clean message history and a single-flight `loading` flag. A turn must
//! win [`ConversationStore::try_acquire`] before it contacts the completion
//! service, and [`ConversationStore::persist`] is the only transition that
//! clears the flag together with new history.
//!
//! # Example
//!
//! ```
//! use zeptocord::session::{Acquire, ConversationManager, ConversationStore, Message};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = ConversationManager::new_memory();
//!
//!     match store.try_acquire("thread-1", "user-1").await.unwrap() {
//!         Acquire::Locked(record) => {
//!             let mut messages = record.messages;
//!             messages.push(Message::user("hi"));
//!             messages.push(Message::assistant("hello"));
//!             store.persist("thread-1", messages, "user-1").await.unwrap();
//!         }
//!         other => panic!("unexpected {:?}", other),
//!     }
//! }
//! ```

pub mod types;

pub use types::{
    strip_tool_exchanges, ConversationRecord, FunctionCall, Message, Role, ToolCall,
};

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::Result;

/// Outcome of a lock attempt.
#[derive(Debug, Clone)]
pub enum Acquire {
    /// Lock taken; the record as it was before this turn
    Locked(ConversationRecord),
    /// Another turn is running
    Busy,
    /// The conversation belongs to a different requester
    OwnerMismatch { owner: String },
}

/// Persisted conversation state with a single-flight lock.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Load a record, creating an unlocked one owned by `owner_id` if absent.
    async fn get_or_create(&self, id: &str, owner_id: &str) -> Result<ConversationRecord>;

    /// Atomically check and set the `loading` flag.
    async fn try_acquire(&self, id: &str, owner_id: &str) -> Result<Acquire>;

    /// Write final history and clear `loading`.
    async fn persist(&self, id: &str, messages: Vec<Message>, owner_id: &str) -> Result<()>;

    /// Clear `loading` without touching history.
    async fn release(&self, id: &str) -> Result<()>;
}

/// One conversation's cached record; `None` until first loaded.
type Slot = Arc<Mutex<Option<ConversationRecord>>>;

/// Conversation store with an in-memory cache and optional JSON files.
///
/// Records live in `<storage_path>/<sanitized id>.json`. The cache is the
/// source of truth for a running process; files let a restart pick up
/// history (and any lock a crash left behind, which the lease clears).
///
/// The map lock is only held to find a conversation's slot. Reads, checks
/// and file writes for a conversation happen under that slot's own mutex,
/// so conversations never wait on each other's disk I/O.
pub struct ConversationManager {
    records: Arc<RwLock<HashMap<String, Slot>>>,
    storage_path: Option<PathBuf>,
    lease: Option<Duration>,
}

impl ConversationManager {
    /// Memory-only store without a lock lease.
    pub fn new_memory() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            storage_path: None,
            lease: None,
        }
    }

    /// File-backed store rooted at `path`. The directory is created if needed.
    pub fn with_path(path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&path)?;
        Ok(Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            storage_path: Some(path),
            lease: None,
        })
    }

    /// Build from config: file-backed when a directory is set.
    pub fn from_config(config: &crate::config::ConversationConfig) -> Result<Self> {
        let store = match &config.storage_dir {
            Some(dir) => Self::with_path(dir.clone())?,
            None => Self::new_memory(),
        };
        let lease = (config.lock_lease_secs > 0).then(|| Duration::from_secs(config.lock_lease_secs));
        Ok(store.with_lease(lease))
    }

    /// Treat locks older than `lease` as abandoned (builder pattern).
    pub fn with_lease(mut self, lease: Option<Duration>) -> Self {
        self.lease = lease;
        self
    }

    async fn slot(&self, id: &str) -> Slot {
        if let Some(slot) = self.records.read().await.get(id) {
            return Arc::clone(slot);
        }
        let mut records = self.records.write().await;
        Arc::clone(
            records
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(None))),
        )
    }

    /// Fill an empty slot from disk. `None` when the conversation is new.
    async fn cached(
        &self,
        id: &str,
        slot: &mut Option<ConversationRecord>,
    ) -> Result<Option<ConversationRecord>> {
        if slot.is_none() {
            *slot = self.load(id).await?;
        }
        Ok(slot.clone())
    }

    fn file_for(&self, id: &str) -> Option<PathBuf> {
        self.storage_path
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", sanitize_key(id))))
    }

    async fn load(&self, id: &str) -> Result<Option<ConversationRecord>> {
        if let Some(path) = self.file_for(id) {
            if tokio::fs::try_exists(&path).await? {
                let content = tokio::fs::read_to_string(&path).await?;
                return Ok(Some(serde_json::from_str(&content)?));
            }
        }
        Ok(None)
    }

    async fn write(&self, id: &str, record: &ConversationRecord) -> Result<()> {
        if let Some(path) = self.file_for(id) {
            let content = serde_json::to_string_pretty(record)?;
            tokio::fs::write(&path, content).await?;
        }
        Ok(())
    }

    fn lease_expired(&self, record: &ConversationRecord) -> bool {
        let (Some(lease), Some(since)) = (self.lease, record.loading_since) else {
            return false;
        };
        let held = Utc::now().signed_duration_since(since);
        held.to_std().map(|held| held >= lease).unwrap_or(false)
    }
}

#[async_trait]
impl ConversationStore for ConversationManager {
    async fn get_or_create(&self, id: &str, owner_id: &str) -> Result<ConversationRecord> {
        let slot = self.slot(id).await;
        let mut cached = slot.lock().await;
        if let Some(record) = self.cached(id, &mut cached).await? {
            return Ok(record);
        }

        let record = ConversationRecord::new(owner_id);
        self.write(id, &record).await?;
        *cached = Some(record.clone());
        Ok(record)
    }

    async fn try_acquire(&self, id: &str, owner_id: &str) -> Result<Acquire> {
        let slot = self.slot(id).await;
        let mut cached = slot.lock().await;

        let mut record = self
            .cached(id, &mut cached)
            .await?
            .unwrap_or_else(|| ConversationRecord::new(owner_id));

        if record.loading {
            if self.lease_expired(&record) {
                warn!(conversation = %id, "Lock lease expired, taking over abandoned turn");
            } else {
                debug!(conversation = %id, "Conversation busy");
                return Ok(Acquire::Busy);
            }
        }

        if !record.request_user_id.is_empty() && record.request_user_id != owner_id {
            debug!(conversation = %id, owner = %record.request_user_id, "Owner mismatch");
            return Ok(Acquire::OwnerMismatch {
                owner: record.request_user_id.clone(),
            });
        }

        let before = record.clone();
        record.loading = true;
        record.loading_since = Some(Utc::now());
        record.request_user_id = owner_id.to_string();

        self.write(id, &record).await?;
        *cached = Some(record);
        Ok(Acquire::Locked(ConversationRecord {
            loading: false,
            loading_since: None,
            ..before
        }))
    }

    async fn persist(&self, id: &str, messages: Vec<Message>, owner_id: &str) -> Result<()> {
        let record = ConversationRecord {
            messages,
            loading: false,
            request_user_id: owner_id.to_string(),
            loading_since: None,
        };
        let slot = self.slot(id).await;
        let mut cached = slot.lock().await;
        self.write(id, &record).await?;
        *cached = Some(record);
        Ok(())
    }

    async fn release(&self, id: &str) -> Result<()> {
        let slot = self.slot(id).await;
        let mut cached = slot.lock().await;
        let Some(mut record) = self.cached(id, &mut cached).await? else {
            return Ok(());
        };
        record.loading = false;
        record.loading_since = None;
        self.write(id, &record).await?;
        *cached = Some(record);
        Ok(())
    }
}

/// Percent-encode characters that are unsafe in file names.
fn sanitize_key(key: &str) -> String {
    let mut result = String::with_capacity(key.len());
    for c in key.chars() {
        match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '%' => {
                result.push_str(&format!("%{:02X}", c as u32));
            }
            c => result.push(c),
        }
    }
    result
}
