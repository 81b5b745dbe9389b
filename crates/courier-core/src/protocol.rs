//! Session-protocol surface — the seam between the pipeline and the
//! double-ratchet implementation.
//!
//! The ratchet itself lives behind [`SessionCipher`]; this module only fixes
//! the failure vocabulary and how each failure maps to a stored outcome.

use zeroize::Zeroizing;

use crate::message::Outcome;

// ── Addressing ────────────────────────────────────────────────────────────────

/// Device id assumed when only a recipient is known.
pub const DEFAULT_DEVICE_ID: u32 = 1;

/// A single device of a recipient. Session state is per device, not per
/// recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteDevice {
    pub recipient_id: u64,
    pub device_id: u32,
}

impl RemoteDevice {
    pub fn new(recipient_id: u64, device_id: u32) -> Self {
        Self {
            recipient_id,
            device_id,
        }
    }

    /// The recipient's primary device.
    pub fn primary(recipient_id: u64) -> Self {
        Self::new(recipient_id, DEFAULT_DEVICE_ID)
    }
}

// ── Secrets ───────────────────────────────────────────────────────────────────

/// Handle on the unlocked local key material. Wiped on drop.
pub struct LiveSecret(Zeroizing<[u8; 32]>);

impl LiveSecret {
    pub fn new(material: [u8; 32]) -> Self {
        Self(Zeroizing::new(material))
    }

    pub fn material(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Clone for LiveSecret {
    fn clone(&self) -> Self {
        Self(Zeroizing::new(*self.0))
    }
}

impl std::fmt::Debug for LiveSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LiveSecret(..)")
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Every way a session-protocol operation can fail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid key material")]
    InvalidKey,

    #[error("message failed authentication or parsing")]
    InvalidMessage,

    #[error("sender address could not be resolved")]
    UnresolvableSender,

    #[error("no session exists for this device")]
    NoSession,

    #[error("unsupported protocol version {found}")]
    InvalidVersion { found: u32 },

    #[error("legacy message format")]
    LegacyMessage,

    #[error("duplicate message")]
    DuplicateMessage,

    #[error("message references rotated key id {key_id}")]
    StaleKeyId { key_id: u32 },

    #[error("key exchange superseded by a newer one")]
    StaleKeyExchange,

    #[error("untrusted identity key for {identity}")]
    UntrustedIdentity { identity: String },
}

impl ProtocolError {
    /// The stored outcome this failure produces.
    ///
    /// `UntrustedIdentity` produces none: it is surfaced as a transient
    /// warning and the message is kept as a standard one, unflagged.
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            ProtocolError::InvalidKey
            | ProtocolError::InvalidMessage
            | ProtocolError::UnresolvableSender
            | ProtocolError::NoSession => Some(Outcome::Corrupted),
            ProtocolError::InvalidVersion { .. } => Some(Outcome::InvalidVersion),
            ProtocolError::LegacyMessage => Some(Outcome::Legacy),
            ProtocolError::DuplicateMessage => Some(Outcome::Duplicate),
            ProtocolError::StaleKeyId { .. } | ProtocolError::StaleKeyExchange => {
                Some(Outcome::Stale)
            }
            ProtocolError::UntrustedIdentity { .. } => None,
        }
    }
}

// ── Cipher seam ───────────────────────────────────────────────────────────────

/// Result of accepting a prekey bundle: the bootstrap decrypt.
pub struct PreKeyDecrypt {
    /// Decrypted payload of the bundled inner message.
    pub plaintext: Vec<u8>,
    /// Transport-encoded inner message, stored provisionally until the
    /// plaintext replaces it.
    pub session_body: String,
}

/// An auto-generated key-exchange reply, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingExchange {
    pub body: String,
}

/// The opaque ratchet implementation the pipeline drives.
///
/// Callers must serialize invocations per [`RemoteDevice`]; implementations
/// mutate per-device session state and are not required to tolerate
/// interleaving.
pub trait SessionCipher: Send + Sync {
    /// Process a session-bootstrap bundle and decrypt the message inside it.
    fn decrypt_prekey_bundle(
        &self,
        secret: &LiveSecret,
        remote: RemoteDevice,
        bundle: &[u8],
    ) -> Result<PreKeyDecrypt, ProtocolError>;

    /// Process an inbound key exchange. Returns the reply to send back, if
    /// this side owes one.
    fn process_key_exchange(
        &self,
        secret: &LiveSecret,
        remote: RemoteDevice,
        exchange: &[u8],
    ) -> Result<Option<OutgoingExchange>, ProtocolError>;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
