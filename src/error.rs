//! Error types for ZeptoCord
//!
//! Turn-level failures (`Transport`, `StreamIncomplete`, provider HTTP errors)
//! stop the current turn. Tool-level failures are converted into JSON payloads
//! by the dispatcher and never leave a batch. Lock rejections
//! (`ConversationBusy`, `OwnerMismatch`) happen before any completion request.

use std::fmt;
use thiserror::Error;

// ============================================================================
// Provider Error Classification
// ============================================================================

/// Classification of a non-success HTTP response from the completion service.
#[derive(Debug)]
pub enum ProviderError {
    /// 401/403: invalid API key
    Auth(String),
    /// 429: rate limit or quota exceeded
    RateLimit(String),
    /// 5xx: server-side errors
    ServerError(String),
    /// 400: malformed request or parameters
    InvalidRequest(String),
    /// 404: model or deployment not found
    ModelNotFound(String),
    /// Anything else
    Unknown(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Auth(msg) => write!(f, "Authentication error: {}", msg),
            ProviderError::RateLimit(msg) => write!(f, "Rate limit error: {}", msg),
            ProviderError::ServerError(msg) => write!(f, "Server error: {}", msg),
            ProviderError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ProviderError::ModelNotFound(msg) => write!(f, "Model not found: {}", msg),
            ProviderError::Unknown(msg) => write!(f, "Unknown provider error: {}", msg),
        }
    }
}

impl ProviderError {
    /// Classifies an HTTP status and response body.
    pub fn from_status(status: u16, body: &str) -> Self {
        let msg = format!("HTTP {}: {}", status, body);
        match status {
            401 | 403 => ProviderError::Auth(msg),
            429 => ProviderError::RateLimit(msg),
            400 | 422 => ProviderError::InvalidRequest(msg),
            404 => ProviderError::ModelNotFound(msg),
            500..=599 => ProviderError::ServerError(msg),
            _ => ProviderError::Unknown(msg),
        }
    }

    /// Returns the HTTP status code associated with this error, if applicable.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::Auth(_) => Some(401),
            ProviderError::RateLimit(_) => Some(429),
            ProviderError::ServerError(_) => Some(500),
            ProviderError::InvalidRequest(_) => Some(400),
            ProviderError::ModelNotFound(_) => Some(404),
            ProviderError::Unknown(_) => None,
        }
    }
}

impl From<ProviderError> for CordError {
    fn from(err: ProviderError) -> Self {
        CordError::Provider(err)
    }
}

// ============================================================================
// Primary Error Type
// ============================================================================

/// The primary error type for ZeptoCord operations.
#[derive(Error, Debug)]
pub enum CordError {
    /// Configuration-related errors (missing API key, bad values, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Completion service rejected the request
    #[error("Provider error: {0}")]
    Provider(ProviderError),

    /// Connection dropped or stalled while reading the completion stream
    #[error("Transport error: {0}")]
    Transport(String),

    /// Completion stream ended without any finish reason
    #[error("Completion stream ended without a finish reason")]
    StreamIncomplete,

    /// Another turn already holds the conversation lock
    #[error("Conversation {0} is busy")]
    ConversationBusy(String),

    /// Conversation belongs to a different requester
    #[error("Conversation {conversation} is owned by {owner}")]
    OwnerMismatch { conversation: String, owner: String },

    /// Tool handler failure, optionally with structured fields for the model
    #[error("Tool error: {message}")]
    Tool {
        message: String,
        details: Option<serde_json::Value>,
    },

    /// Tool call named a tool that is not registered
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool arguments did not match the tool's schema
    #[error("Invalid arguments for {tool}: {message}")]
    ToolValidation { tool: String, message: String },

    /// Channel errors (gateway failures, REST rejections, etc.)
    #[error("Channel error: {0}")]
    Channel(String),

    /// Conversation store errors
    #[error("Session error: {0}")]
    Session(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Message bus channel closed unexpectedly
    #[error("Bus error: channel closed")]
    BusClosed,
}

impl CordError {
    /// Shorthand for a tool handler failure without structured fields.
    pub fn tool(message: impl Into<String>) -> Self {
        CordError::Tool {
            message: message.into(),
            details: None,
        }
    }

    /// Shorthand for a tool handler failure carrying structured fields.
    pub fn tool_with_details(message: impl Into<String>, details: serde_json::Value) -> Self {
        CordError::Tool {
            message: message.into(),
            details: Some(details),
        }
    }

    /// Whether this error ends the current turn without persisting.
    pub fn is_turn_fatal(&self) -> bool {
        matches!(
            self,
            CordError::Transport(_)
                | CordError::StreamIncomplete
                | CordError::Provider(_)
                | CordError::Http(_)
        )
    }
}

/// A specialized `Result` type for ZeptoCord operations.
pub type Result<T> = std::result::Result<T, CordError>;
