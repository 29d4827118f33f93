//! Broadcast bus for `EngineEvent`.
//!
//! Live observers (progress output, tests) subscribe here while nodes run.
//! Publishing with no active subscribers is a no-op, so the engine publishes
//! unconditionally.

use rampart_types::event::EngineEvent;
use tokio::sync::broadcast;

/// Default channel capacity. Slow subscribers lag rather than block nodes.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Multi-consumer bus for engine lifecycle events.
///
/// Cloning the bus clones the sender, so every clone publishes to the same
/// set of subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
