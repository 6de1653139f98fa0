//! Message Bus Module
//!
//! Routes inbound messages from channels to the agent worker.
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────────┐
//! │   Channel   │────>│  MessageBus │────>│ ConversationLoop │
//! │  (Discord)  │     │  (inbound)  │     │                  │
//! └─────────────┘     └─────────────┘     └──────────────────┘
//! ```
//!
//! Replies do not travel back over the bus: each turn edits its own reply
//! handles directly.
//!
//! # Example
//!
//! ```
//! use zeptocord::bus::{MessageBus, InboundMessage};
//!
//! #[tokio::main]
//! async fn main() {
//!     let bus = MessageBus::new();
//!     let msg = InboundMessage::new("discord", "user123", "chat456", "Hello");
//!     bus.publish_inbound(msg).await.unwrap();
//!
//!     if let Some(received) = bus.consume_inbound().await {
//!         assert_eq!(received.content, "Hello");
//!     }
//! }
//! ```

pub mod message;

pub use message::InboundMessage;

use crate::error::{CordError, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

const DEFAULT_BUFFER_SIZE: usize = 100;

/// Inbound message queue shared by channels and the agent.
///
/// Cloning shares the underlying channel.
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Arc<Mutex<mpsc::Receiver<InboundMessage>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(buffer_size);
        Self {
            inbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
        }
    }

    /// Publish a message, waiting for buffer space.
    pub async fn publish_inbound(&self, msg: InboundMessage) -> Result<()> {
        self.inbound_tx
            .send(msg)
            .await
            .map_err(|_| CordError::BusClosed)
    }

    /// Next message, or `None` once every sender is gone.
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        self.inbound_rx.lock().await.recv().await
    }

    pub fn inbound_sender(&self) -> mpsc::Sender<InboundMessage> {
        self.inbound_tx.clone()
    }

    /// Publish without waiting; fails when the buffer is full.
    pub fn try_publish_inbound(&self, msg: InboundMessage) -> Result<()> {
        self.inbound_tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                CordError::Channel("inbound buffer full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => CordError::BusClosed,
        })
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MessageBus {
    fn clone(&self) -> Self {
        Self {
            inbound_tx: self.inbound_tx.clone(),
            inbound_rx: Arc::clone(&self.inbound_rx),
        }
    }
}
