//! Gateway status events.
//!
//! Events are delivered over a broadcast channel: emission never blocks,
//! and losing a slow subscriber loses events for that subscriber only.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Status events observable by a host UI or log subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayEvent {
    TokenRequested { caller_id: String },
    TokenApproved { caller_id: String },
    TokenDenied { caller_id: String },
    TokenRevoked { caller_id: String },
    ConversationCreated { conversation_id: String },
    ConversationClosed { conversation_id: String },
    ConversationExpired { conversation_id: String },
    GenerationStarted { conversation_id: String },
    GenerationCompleted { conversation_id: String, reply_chars: usize },
    GenerationFailed { conversation_id: String, error: String },
    ModelLoaded { model_path: String, backend: String },
    EngineClosed,
}

/// Port for emitting gateway status events.
///
/// Implementations must never block the emitting service; drop events
/// rather than wait on a slow subscriber.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: GatewayEvent);
}

/// Emitter that discards everything, for tests and headless embedders.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit(&self, _event: GatewayEvent) {}
}

/// Non-blocking fan-out of [`GatewayEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<GatewayEvent>,
}

impl EventBroadcaster {
    /// Create a broadcaster buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create a broadcaster with the default capacity (256 events).
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(256)
    }

    /// Subscribe to future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventEmitter for EventBroadcaster {
    /// Emit an event. Having no subscribers is fine.
    fn emit(&self, event: GatewayEvent) {
        let _ = self.sender.send(event);
    }
}
