//! Chat message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message of a conversation.
///
/// Messages flagged with `error` are shown to the user but never sent to the
/// model and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// An assistant-side message describing a failed turn.
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            error: true,
            ..Self::with_role(Role::Assistant, content)
        }
    }

    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            error: false,
            timestamp: Some(Utc::now()),
        }
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }

    /// Whether the message belongs in model input and persisted history.
    pub fn is_conversational(&self) -> bool {
        !self.error && self.role != Role::System
    }
}

/// Timestamps are informational; two messages are equal when role, content
/// and error marker match.
impl PartialEq for ChatMessage {
    fn eq(&self, other: &Self) -> bool {
        self.role == other.role && self.content == other.content && self.error == other.error
    }
}

impl Eq for ChatMessage {}
