//! Conversation Builder
//!
//! Turns stored history plus the system prompt into the message list
//! sent to the model. Rebuilt on every request, never cached.

use crate::history::{HistoryStore, Role, StorageError};

/// Role of a message sent to the model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl From<Role> for ChatRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => ChatRole::User,
            Role::Assistant => ChatRole::Assistant,
        }
    }
}

/// A message in a conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Builds per-user conversations
#[derive(Debug, Clone)]
pub struct ConversationBuilder {
    system_prompt: String,
    max_turns: usize,
}

impl ConversationBuilder {
    pub fn new(system_prompt: impl Into<String>, max_turns: usize) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            max_turns,
        }
    }

    /// Create from config
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(config.system_prompt.clone(), config.max_history_messages)
    }

    /// System entry followed by the user's most recent turns, oldest first
    pub fn build(&self, store: &HistoryStore, user_id: i64) -> Result<Vec<ChatMessage>, StorageError> {
        let turns = store.read(user_id, self.max_turns)?;

        let mut messages = Vec::with_capacity(turns.len() + 1);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend(turns.into_iter().map(|turn| ChatMessage {
            role: turn.role.into(),
            content: turn.text,
        }));

        Ok(messages)
    }
}
