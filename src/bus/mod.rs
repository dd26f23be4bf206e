//! Event bus for inter-component communication
//!
//! Uses tokio::sync::broadcast for pub/sub pattern.
//! The bus is also the production `StatusObserver`: phase and health
//! callbacks become events that SSE clients and the log can follow.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::health::DeviceHealthStatus;
use crate::player::PlayerStatus;
use crate::recovery::RecoveryPhase;

/// Event types that can be published on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum BusEvent {
    // Recovery events
    RecoveryPhaseChanged {
        phase: RecoveryPhase,
        message: String,
        progress: f32,
    },
    HardReloadRequested { attempts: u32 },

    // Health events
    DeviceHealthChanged { status: DeviceHealthStatus },

    // Player lifecycle events
    PlayerStatusChanged {
        status: PlayerStatus,
        device_id: Option<String>,
    },

    // System events
    ShuttingDown { reason: Option<String> },
}

/// Outward callback interface for the presentation layer.
///
/// Implementations must not panic or block; both calls are fire-and-forget.
pub trait StatusObserver: Send + Sync {
    fn on_phase_change(&self, phase: RecoveryPhase, message: &str, progress: f32);
    fn on_health_change(&self, status: DeviceHealthStatus);
}

/// Event bus handle for publishing and subscribing
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BusEvent>,
}

impl EventBus {
    /// Create a new event bus with specified capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: BusEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl StatusObserver for EventBus {
    fn on_phase_change(&self, phase: RecoveryPhase, message: &str, progress: f32) {
        self.publish(BusEvent::RecoveryPhaseChanged {
            phase,
            message: message.to_string(),
            progress,
        });
    }

    fn on_health_change(&self, status: DeviceHealthStatus) {
        self.publish(BusEvent::DeviceHealthChanged { status });
    }
}

/// Shared event bus wrapped in Arc for thread-safe sharing
pub type SharedBus = Arc<EventBus>;

/// Create a new shared event bus
pub fn create_bus() -> SharedBus {
    Arc::new(EventBus::default())
}
