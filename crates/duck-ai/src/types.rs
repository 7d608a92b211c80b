//! Core types for conversations

use serde::{Deserialize, Serialize};

use crate::models::ModelType;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single role-tagged message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The ordered message log of one conversation plus its model.
///
/// Serializes to exactly the `/chat` request body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationLog {
    pub model: ModelType,
    pub messages: Vec<Message>,
}

impl ConversationLog {
    /// Create an empty log for a model
    pub fn new(model: ModelType) -> Self {
        Self {
            model,
            messages: Vec::new(),
        }
    }

    pub fn append_user(&mut self, text: impl Into<String>) {
        self.messages.push(Message::user(text));
    }

    pub fn append_assistant(&mut self, text: impl Into<String>) {
        self.messages.push(Message::assistant(text));
    }

    /// Keep the first `2k - 1` messages: `k` user turns and the `k - 1`
    /// replies between them. `k == 0` keeps only the opening message.
    pub fn truncate_to_turns(&mut self, k: usize) {
        let keep = (2 * k).saturating_sub(1).max(1);
        self.messages.truncate(keep);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of user messages in the log
    pub fn user_turns(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == Role::User)
            .count()
    }

    /// The last message, if any
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}
