//! Conversation log storage
//!
//! Stores conversation messages with timestamps. The log only grows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    /// Role name in the chat-completions wire format
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

/// A single message in the conversation log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub role: MessageRole,
    pub content: String,
}

impl ConversationMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            role,
            content: content.into(),
        }
    }
}

/// Ordered conversation for one session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationLog {
    messages: Vec<ConversationMessage>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to the log
    pub fn append(&mut self, role: MessageRole, content: impl Into<String>) {
        self.messages.push(ConversationMessage::new(role, content));
    }

    /// Append one completed turn: the user's message then the agent's reply
    pub fn record_turn(&mut self, user_message: &str, reply: &str) {
        self.append(MessageRole::User, user_message);
        self.append(MessageRole::Assistant, reply);
    }

    /// Iterate over all messages, oldest first
    pub fn messages(&self) -> impl Iterator<Item = &ConversationMessage> {
        self.messages.iter()
    }

    pub fn last(&self) -> Option<&ConversationMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
