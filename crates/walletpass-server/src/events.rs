//! In-process pass lifecycle events.
//!
//! Emitters never wait on or fail because of subscribers. A subscriber that
//! falls behind loses the oldest events.

use tokio::sync::broadcast;
use tracing::trace;

/// Buffered events per subscriber.
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassEvent {
    /// A device registered for updates to a pass.
    PassRegistered {
        pass_id: i64,
        device_library_identifier: String,
        push_token: String,
    },
    /// A device registration was removed.
    PassUnregistered {
        pass_id: i64,
        device_library_identifier: String,
    },
    /// A pass artifact was stored or replaced.
    PassUpdated { pass_id: i64 },
    /// The push service reported a token as permanently invalid.
    PushTokenGone { push_token: String },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PassEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn emit(&self, event: PassEvent) {
        // Err only means nobody is listening.
        if self.tx.send(event).is_err() {
            trace!("Pass event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PassEvent> {
        self.tx.subscribe()
    }
}
