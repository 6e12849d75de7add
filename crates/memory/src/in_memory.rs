//! In-memory conversation store, useful for testing and ephemeral sessions.

use async_trait::async_trait;
use astrochat_core::error::StoreError;
use astrochat_core::message::ConversationTurn;
use astrochat_core::store::{ConversationStore, TurnFilter};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A conversation store that keeps turns in a Vec, sorted by timestamp.
/// Useful for testing and sessions where persistence isn't needed.
pub struct InMemoryTurnStore {
    turns: Arc<RwLock<Vec<ConversationTurn>>>,
}

impl InMemoryTurnStore {
    pub fn new() -> Self {
        Self {
            turns: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl Default for InMemoryTurnStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Insert after every turn with an equal or earlier timestamp, so ties keep
/// insertion order.
fn insert_sorted(turns: &mut Vec<ConversationTurn>, turn: ConversationTurn) {
    let at = turns.partition_point(|t| t.timestamp() <= turn.timestamp());
    turns.insert(at, turn);
}

#[async_trait]
impl ConversationStore for InMemoryTurnStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn append(&self, turn: ConversationTurn) -> Result<(), StoreError> {
        self.append_all(vec![turn]).await
    }

    async fn append_all(&self, turns: Vec<ConversationTurn>) -> Result<(), StoreError> {
        if turns.iter().any(|t| t.content().trim().is_empty()) {
            return Err(StoreError::EmptyContent);
        }

        let mut stored = self.turns.write().await;
        if let Some(dup) = turns
            .iter()
            .find(|t| stored.iter().any(|s| s.id() == t.id()))
        {
            return Err(StoreError::WriteFailed(format!("duplicate turn id {}", dup.id())));
        }
        for turn in turns {
            insert_sorted(&mut stored, turn);
        }
        Ok(())
    }

    async fn fetch_tail(&self, n: usize) -> Result<Vec<ConversationTurn>, StoreError> {
        let turns = self.turns.read().await;
        let start = turns.len().saturating_sub(n);
        Ok(turns[start..].to_vec())
    }

    async fn fetch_all(&self, filter: &TurnFilter) -> Result<Vec<ConversationTurn>, StoreError> {
        let turns = self.turns.read().await;
        Ok(turns.iter().filter(|t| filter.matches(t)).cloned().collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.turns.read().await.len())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.turns.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use astrochat_core::message::Role;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn append_and_tail() {
        let store = InMemoryTurnStore::new();
        store.append(ConversationTurn::user("first").unwrap()).await.unwrap();
        store
            .append(ConversationTurn::assistant("second").unwrap())
            .await
            .unwrap();
        store.append(ConversationTurn::user("third").unwrap()).await.unwrap();

        let tail = store.fetch_tail(2).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].content(), "second");
        assert_eq!(tail[1].content(), "third");
    }

    #[tokio::test]
    async fn late_arrival_is_placed_by_timestamp() {
        let store = InMemoryTurnStore::new();
        let now = Utc::now();
        store
            .append(ConversationTurn::at(Role::User, "newer", now).unwrap())
            .await
            .unwrap();
        store
            .append(ConversationTurn::at(Role::User, "older", now - Duration::seconds(1)).unwrap())
            .await
            .unwrap();

        let all = store.fetch_all(&TurnFilter::all()).await.unwrap();
        assert_eq!(all[0].content(), "older");
        assert_eq!(all[1].content(), "newer");
    }

    #[tokio::test]
    async fn duplicate_ids_rejected_atomically() {
        let store = InMemoryTurnStore::new();
        let turn = ConversationTurn::user("once").unwrap();
        store.append(turn.clone()).await.unwrap();

        let fresh = ConversationTurn::assistant("fresh").unwrap();
        assert!(store.append_all(vec![fresh, turn]).await.is_err());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn clear_then_tail_is_empty() {
        let store = InMemoryTurnStore::new();
        store.clear().await.unwrap();
        assert!(store.fetch_tail(5).await.unwrap().is_empty());
    }
}
