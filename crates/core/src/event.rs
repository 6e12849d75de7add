//! Domain events and the remote conversation mirror.
//!
//! The dispatcher publishes events when turns are persisted or a provider
//! call fails. Publishing never blocks and never fails, which is what keeps
//! the best-effort mirror off the critical path: a spawned forwarder
//! subscribes and relays events to the mirror on its own time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::message::ConversationTurn;
use crate::provider::ProviderKind;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A turn was durably appended to the conversation store
    TurnPersisted { turn: ConversationTurn },

    /// A provider call finished with a classified failure
    ResponseFailed {
        provider: ProviderKind,
        kind: String,
        http_status: Option<u16>,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },

    /// The active provider was switched
    ProviderSwitched {
        from: ProviderKind,
        to: ProviderKind,
        timestamp: DateTime<Utc>,
    },

    /// The conversation log was cleared
    ConversationCleared { timestamp: DateTime<Utc> },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Error reported by a mirror. Only ever logged.
#[derive(Debug, thiserror::Error)]
#[error("Mirror error: {0}")]
pub struct MirrorError(pub String);

/// Best-effort remote copy of the conversation (analytics, backup, ...).
#[async_trait]
pub trait ConversationMirror: Send + Sync {
    fn name(&self) -> &str;

    async fn mirror_turn(&self, turn: &ConversationTurn) -> std::result::Result<(), MirrorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let turn = ConversationTurn::user("Hello stars").unwrap();
        bus.publish(DomainEvent::TurnPersisted { turn: turn.clone() });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::TurnPersisted { turn: got } => assert_eq!(got, &turn),
            _ => panic!("Expected TurnPersisted event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::ConversationCleared {
            timestamp: Utc::now(),
        });
    }
}
