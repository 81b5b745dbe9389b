//! Inbound message model — classification and processing outcomes.
//!
//! Classification looks only at the assembled body text. It is pure: no
//! session state, no stores, no clock.

// ── Wire prefixes ─────────────────────────────────────────────────────────────

/// Marker prefix on an encrypted session message.
pub const PREFIX_SECURE: &str = "?TSM";
/// Marker prefix on a key-exchange message.
pub const PREFIX_KEY_EXCHANGE: &str = "?TSK";
/// Marker prefix on a session-bootstrap prekey bundle.
pub const PREFIX_PREKEY_BUNDLE: &str = "?TSP";
/// Marker prefix on a session-termination message.
pub const PREFIX_END_SESSION: &str = "?TSE";

// ── Kind ──────────────────────────────────────────────────────────────────────

/// What an inbound body claims to be, decided by its wire prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Standard,
    Secure,
    PreKeyBundle,
    KeyExchange,
    EndSession,
}

impl MessageKind {
    /// Classify a fully assembled body.
    ///
    /// Checked most-specific first; a body carrying several markers (which a
    /// hostile sender can fabricate) resolves to the highest-priority kind.
    pub fn classify(body: &str) -> MessageKind {
        if body.starts_with(PREFIX_END_SESSION) {
            MessageKind::EndSession
        } else if body.starts_with(PREFIX_PREKEY_BUNDLE) {
            MessageKind::PreKeyBundle
        } else if body.starts_with(PREFIX_KEY_EXCHANGE) {
            MessageKind::KeyExchange
        } else if body.starts_with(PREFIX_SECURE) {
            MessageKind::Secure
        } else {
            MessageKind::Standard
        }
    }

    /// True for every kind that engages the session protocol.
    pub fn is_session_protocol(self) -> bool {
        !matches!(self, MessageKind::Standard)
    }

    fn prefix(self) -> Option<&'static str> {
        match self {
            MessageKind::Standard => None,
            MessageKind::Secure => Some(PREFIX_SECURE),
            MessageKind::PreKeyBundle => Some(PREFIX_PREKEY_BUNDLE),
            MessageKind::KeyExchange => Some(PREFIX_KEY_EXCHANGE),
            MessageKind::EndSession => Some(PREFIX_END_SESSION),
        }
    }
}

// ── Outcome ───────────────────────────────────────────────────────────────────

/// Terminal processing state recorded on a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Undecodable, undecryptable, or from an unresolvable sender.
    Corrupted,
    /// Referenced a rotated or superseded key.
    Stale,
    /// Protocol version this client does not speak.
    InvalidVersion,
    /// Downgraded or obsolete message format.
    Legacy,
    /// Replayed message, already seen.
    Duplicate,
    /// Handled successfully (key exchanges only; decrypted messages carry
    /// their plaintext instead).
    Processed,
}

// ── InboundMessage ────────────────────────────────────────────────────────────

/// One assembled inbound message moving through the pipeline.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub sender: String,
    pub sender_device_id: u32,
    pub body: String,
    pub kind: MessageKind,
    outcome: Option<Outcome>,
}

impl InboundMessage {
    pub fn new(sender: impl Into<String>, sender_device_id: u32, body: impl Into<String>) -> Self {
        let body = body.into();
        let kind = MessageKind::classify(&body);
        Self {
            sender: sender.into(),
            sender_device_id,
            body,
            kind,
            outcome: None,
        }
    }

    /// The body with its wire prefix stripped. Standard bodies pass through.
    pub fn payload(&self) -> &str {
        match self.kind.prefix() {
            Some(p) => &self.body[p.len()..],
            None => &self.body,
        }
    }

    /// Record the terminal outcome. The first call wins; a message never
    /// changes its mind.
    pub fn set_outcome(&mut self, outcome: Outcome) {
        if self.outcome.is_none() {
            self.outcome = Some(outcome);
        }
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
