//! Conversation history storage
//!
//! Stores the messages of one chat session with timestamps and the resolved
//! turn context of each user message.

use crate::classifier::TurnContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Agent,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Agent => "agent",
        }
    }

    pub fn parse(raw: &str) -> MessageRole {
        match raw.to_lowercase().as_str() {
            "agent" => MessageRole::Agent,
            _ => MessageRole::User,
        }
    }
}

/// A single message in the conversation history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub role: MessageRole,
    pub content: String,
    /// Intent and entities the turn resolved to (user messages only)
    #[serde(default)]
    pub context: Option<TurnContext>,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>, context: TurnContext) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            role: MessageRole::User,
            content: content.into(),
            context: Some(context),
        }
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            role: MessageRole::Agent,
            content: content.into(),
            context: None,
        }
    }
}

/// Conversation history for a chat session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationHistory {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    messages: VecDeque<ConversationMessage>,
}

impl ConversationHistory {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            messages: VecDeque::new(),
        }
    }

    pub fn add_message(&mut self, message: ConversationMessage) {
        self.messages.push_back(message);
        self.updated_at = Utc::now();
    }

    pub fn messages(&self) -> impl Iterator<Item = &ConversationMessage> {
        self.messages.iter()
    }

    /// Most recent messages, newest first
    pub fn recent_messages(&self, count: usize) -> impl DoubleEndedIterator<Item = &ConversationMessage> {
        self.messages.iter().rev().take(count)
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Context of the latest user turn, if any.
    pub fn last_context(&self) -> Option<&TurnContext> {
        self.messages.iter().rev().find_map(|m| m.context.as_ref())
    }

    /// Drop the oldest messages beyond `keep_count`.
    pub fn trim_to_recent(&mut self, keep_count: usize) {
        while self.messages.len() > keep_count {
            self.messages.pop_front();
        }
        self.updated_at = Utc::now();
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.updated_at = Utc::now();
    }
}
