//! Fire-and-forget relay from the event bus to a [`ConversationMirror`].

use std::sync::Arc;
use std::time::Duration;

use astrochat_core::event::{ConversationMirror, DomainEvent, EventBus};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Upper bound for a single mirror call.
pub const MIRROR_TIMEOUT: Duration = Duration::from_secs(10);

/// Spawn a task that forwards every persisted turn to `mirror`.
///
/// Delivery failures and lagged events are logged and dropped; the
/// dispatcher never waits on the mirror. The task ends when the bus does.
pub fn spawn_mirror_forwarder(
    events: &EventBus,
    mirror: Arc<dyn ConversationMirror>,
) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(mirror = mirror.name(), skipped, "Mirror fell behind, events dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let DomainEvent::TurnPersisted { turn } = event.as_ref() else {
                continue;
            };

            match tokio::time::timeout(MIRROR_TIMEOUT, mirror.mirror_turn(turn)).await {
                Ok(Ok(())) => debug!(mirror = mirror.name(), turn_id = %turn.id(), "Mirrored turn"),
                Ok(Err(e)) => warn!(mirror = mirror.name(), turn_id = %turn.id(), "Mirror failed: {e}"),
                Err(_) => warn!(mirror = mirror.name(), turn_id = %turn.id(), "Mirror timed out"),
            }
        }
        debug!(mirror = mirror.name(), "Event bus closed, mirror forwarder stopped");
    })
}
