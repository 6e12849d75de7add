//! Conversation store trait: the durable, append-only turn log.
//!
//! The store is the only shared mutable resource in the system. Every
//! implementation must serialize writes so that concurrent appends never
//! interleave partial records, and every read must see a consistent snapshot.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::message::ConversationTurn;

/// Filter for [`ConversationStore::fetch_all`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnFilter {
    /// Inclusive lower bound on the turn timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,

    /// Inclusive upper bound on the turn timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,

    /// Literal substring of the content, compared after Unicode lowercasing
    /// on both sides. Every backend applies the same folding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
}

impl TurnFilter {
    /// A filter that matches everything.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            since: Some(since),
            until: Some(until),
            contains: None,
        }
    }

    pub fn containing(text: impl Into<String>) -> Self {
        Self {
            contains: Some(text.into()),
            ..Self::default()
        }
    }

    /// Whether a turn passes this filter.
    pub fn matches(&self, turn: &ConversationTurn) -> bool {
        if self.since.is_some_and(|since| turn.timestamp() < since) {
            return false;
        }
        if self.until.is_some_and(|until| turn.timestamp() > until) {
            return false;
        }
        match &self.contains {
            Some(needle) if !needle.is_empty() => turn
                .content()
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            _ => true,
        }
    }
}

/// The core ConversationStore trait.
///
/// Implementations: SQLite (durable), in-memory (tests, ephemeral sessions).
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Append one turn.
    async fn append(&self, turn: ConversationTurn) -> std::result::Result<(), StoreError>;

    /// Append several turns atomically: readers see all of them or none.
    async fn append_all(&self, turns: Vec<ConversationTurn>) -> std::result::Result<(), StoreError>;

    /// The last `n` turns, oldest first.
    async fn fetch_tail(&self, n: usize) -> std::result::Result<Vec<ConversationTurn>, StoreError>;

    /// Every turn passing `filter`, oldest first.
    async fn fetch_all(&self, filter: &TurnFilter) -> std::result::Result<Vec<ConversationTurn>, StoreError>;

    /// Number of persisted turns.
    async fn count(&self) -> std::result::Result<usize, StoreError>;

    /// Delete every turn. Idempotent.
    async fn clear(&self) -> std::result::Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use chrono::Duration;

    #[test]
    fn empty_filter_matches_everything() {
        let turn = ConversationTurn::user("Is Mercury retrograde?").unwrap();
        assert!(TurnFilter::all().matches(&turn));
    }

    #[test]
    fn substring_filter_is_case_insensitive() {
        let turn = ConversationTurn::user("Is MERCURY retrograde?").unwrap();
        assert!(TurnFilter::containing("mercury").matches(&turn));
        assert!(!TurnFilter::containing("venus").matches(&turn));
    }

    #[test]
    fn date_range_is_inclusive() {
        let now = Utc::now();
        let turn = ConversationTurn::at(Role::Assistant, "Yes, until Friday.", now).unwrap();
        assert!(TurnFilter::between(now, now).matches(&turn));
        assert!(!TurnFilter::between(now + Duration::seconds(1), now + Duration::seconds(5))
            .matches(&turn));
        assert!(!TurnFilter::between(now - Duration::seconds(5), now - Duration::seconds(1))
            .matches(&turn));
    }
}
