//! Conversation turn domain types.
//!
//! A turn is the unit the conversation log stores: the user asks, the
//! assistant answers, and each side becomes one immutable record.
//! System instructions are never a turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// Unique identifier for a conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(pub String);

impl TurnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// One persisted conversation turn.
///
/// Fields are private so that a turn with empty content cannot be built
/// outside [`ConversationTurn::new`] / [`ConversationTurn::restore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    id: TurnId,
    role: Role,
    content: String,
    timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    /// Create a turn stamped with the current time.
    pub fn new(role: Role, content: impl Into<String>) -> Result<Self, StoreError> {
        Self::at(role, content, Utc::now())
    }

    /// Create a turn with an explicit timestamp.
    pub fn at(
        role: Role,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, StoreError> {
        Self::restore(TurnId::new(), role, content, timestamp)
    }

    /// Rebuild a turn read back from storage.
    pub fn restore(
        id: TurnId,
        role: Role,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, StoreError> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(StoreError::EmptyContent);
        }
        Ok(Self {
            id,
            role,
            content,
            timestamp,
        })
    }

    /// Convenience constructor for a user turn.
    pub fn user(content: impl Into<String>) -> Result<Self, StoreError> {
        Self::new(Role::User, content)
    }

    /// Convenience constructor for an assistant turn.
    pub fn assistant(content: impl Into<String>) -> Result<Self, StoreError> {
        Self::new(Role::Assistant, content)
    }

    pub fn id(&self) -> &TurnId {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Rough token estimate (4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> usize {
        self.content.len().div_ceil(4)
    }
}
