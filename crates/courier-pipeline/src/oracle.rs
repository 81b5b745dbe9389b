//! Read-only session queries for callers outside the pipeline.

use std::sync::Arc;

use courier_core::protocol::RemoteDevice;

/// Read access to persisted session records.
pub trait SessionStore: Send + Sync {
    /// Protocol version of the session with this device, if one exists.
    fn load_version(&self, remote: RemoteDevice) -> Option<u32>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no session for recipient {recipient_id} device {device_id}")]
pub struct NoSessionError {
    pub recipient_id: u64,
    pub device_id: u32,
}

/// Answers the two session questions the rest of the client asks.
#[derive(Clone)]
pub struct SessionOracle {
    store: Arc<dyn SessionStore>,
}

impl SessionOracle {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// The session's protocol version. Fails if no session exists; callers
    /// asking this question have no sensible default to fall back on.
    pub fn session_version(&self, remote: RemoteDevice) -> Result<u32, NoSessionError> {
        self.store.load_version(remote).ok_or(NoSessionError {
            recipient_id: remote.recipient_id,
            device_id: remote.device_id,
        })
    }

    /// Whether an outbound encrypted message can be produced for this
    /// device right now. Absence of a session is an ordinary `false`.
    pub fn has_encrypt_capable_session(&self, remote: RemoteDevice) -> bool {
        self.store.load_version(remote).is_some()
    }

    /// Recipient-level variant, checked against the primary device.
    pub fn has_encrypt_capable_session_with(&self, recipient_id: u64) -> bool {
        self.has_encrypt_capable_session(RemoteDevice::primary(recipient_id))
    }
}
