//! Error types for duck-ai

use thiserror::Error;

/// Result type alias using duck-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to the chat backend or the history store
#[derive(Error, Debug)]
pub enum Error {
    /// Backend signaled throttling
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The conversation thread is exhausted; a new conversation is required
    #[error("Conversation limit reached: {0}")]
    ConversationLimit(String),

    /// Malformed or unexpected response shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Network or connection failure
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// No saved conversation exists for the identifier
    #[error("No saved conversation found for ID {0}")]
    NotFound(String),

    /// Stored conversation does not match the expected schema
    #[error("Saved conversation {id} is corrupt: {reason}")]
    Corrupt { id: String, reason: String },

    /// Re-ask requested with nothing to re-ask
    #[error("There are no messages in the conversation history")]
    EmptyHistory,

    /// Operation attempted after the session was closed
    #[error("Session closed before completing the request")]
    Closed,

    /// History directory could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Model name not present in the catalog
    #[error("Unknown model: {0}")]
    UnknownModel(String),
}

impl Error {
    /// Create a corrupt-record error
    pub fn corrupt(id: impl Into<String>, reason: impl ToString) -> Self {
        Self::Corrupt {
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    /// Check if the backend throttled this request in any form
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RateLimited(_) | Error::ConversationLimit(_))
    }

    /// Check if continuing requires starting a fresh conversation
    pub fn requires_new_conversation(&self) -> bool {
        matches!(self, Error::ConversationLimit(_))
    }
}
