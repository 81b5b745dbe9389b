//! Security-update signals emitted by the processor.

use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityEvent {
    /// A new session was established from a prekey bundle.
    SessionEstablished { thread_id: u64 },
    /// A session-protocol message arrived under an unknown identity key.
    UntrustedIdentity { sender: String },
}

/// Fan-out bus for security events. Publishing with no subscribers is fine.
#[derive(Clone)]
pub struct SecurityEventBus {
    tx: broadcast::Sender<SecurityEvent>,
}

impl SecurityEventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SecurityEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: SecurityEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for SecurityEventBus {
    fn default() -> Self {
        Self::new()
    }
}
