//! The secure-message processor.
//!
//! Every assembled inbound message lands here exactly once and leaves
//! persisted exactly once, whatever happens to it cryptographically. A
//! protocol failure never drops a message; it stamps one terminal outcome
//! on it and stores it anyway.

use std::sync::Arc;

use courier_core::encoding;
use courier_core::message::{InboundMessage, MessageKind, Outcome};
use courier_core::protocol::{
    LiveSecret, OutgoingExchange, ProtocolError, RemoteDevice, SessionCipher,
};

use crate::events::{SecurityEvent, SecurityEventBus};
use crate::locks::SessionLocks;

// ── Collaborator seams ────────────────────────────────────────────────────────

/// How a stored body is protected at rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtRestCrypto {
    /// Sealed under the unlocked key material.
    LiveSecret,
    /// Sealed under the cached asymmetric secret (key material locked).
    AsymmetricSecret,
    /// Stored as-is; nothing available to seal with.
    Plaintext,
}

/// Identity of a persisted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredMessage {
    pub message_id: u64,
    pub thread_id: u64,
}

pub trait MessageWriter: Send + Sync {
    /// Persist a message snapshot, allocating its thread if needed.
    fn insert(&self, message: &InboundMessage, at_rest: AtRestCrypto) -> StoredMessage;
    /// Replace the body of an already-stored message.
    fn update_body(&self, message_id: u64, body: &str);
}

pub trait SecretSource: Send + Sync {
    /// The unlocked key material, when the user has unlocked it.
    fn live_secret(&self) -> Option<LiveSecret>;
    fn has_cached_asymmetric_secret(&self) -> bool;
}

pub trait RecipientDirectory: Send + Sync {
    /// Resolve a sender address to its canonical recipient id.
    fn primary_recipient(&self, sender: &str) -> Result<u64, ProtocolError>;
}

/// Where auto-generated key-exchange replies go to be sent.
pub trait ReplyOutbox: Send + Sync {
    fn enqueue(&self, thread_id: u64, reply: OutgoingExchange);
}

/// Hand-off for ciphertext bodies to be decrypted in the background.
pub trait DeferredDecryptQueue: Send + Sync {
    fn schedule(&self, message_id: u64);
}

// ── Processor ─────────────────────────────────────────────────────────────────

pub struct SecureMessageProcessor {
    cipher: Arc<dyn SessionCipher>,
    writer: Arc<dyn MessageWriter>,
    secrets: Arc<dyn SecretSource>,
    directory: Arc<dyn RecipientDirectory>,
    outbox: Arc<dyn ReplyOutbox>,
    deferred: Arc<dyn DeferredDecryptQueue>,
    events: SecurityEventBus,
    locks: SessionLocks,
    auto_respond_key_exchange: bool,
}

impl SecureMessageProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cipher: Arc<dyn SessionCipher>,
        writer: Arc<dyn MessageWriter>,
        secrets: Arc<dyn SecretSource>,
        directory: Arc<dyn RecipientDirectory>,
        outbox: Arc<dyn ReplyOutbox>,
        deferred: Arc<dyn DeferredDecryptQueue>,
        events: SecurityEventBus,
        locks: SessionLocks,
        auto_respond_key_exchange: bool,
    ) -> Self {
        Self {
            cipher,
            writer,
            secrets,
            directory,
            outbox,
            deferred,
            events,
            locks,
            auto_respond_key_exchange,
        }
    }

    /// Run one message through the pipeline. Always persists it.
    pub async fn process(&self, mut message: InboundMessage) -> StoredMessage {
        match message.kind {
            MessageKind::Standard => self.store_standard(&message),
            MessageKind::Secure | MessageKind::EndSession => self.store_ciphertext(&message),
            MessageKind::PreKeyBundle => self.store_prekey_bundle(&mut message).await,
            MessageKind::KeyExchange => self.store_key_exchange(&mut message).await,
        }
    }

    /// Best available at-rest protection right now.
    fn at_rest_preference(&self) -> AtRestCrypto {
        if self.secrets.live_secret().is_some() {
            AtRestCrypto::LiveSecret
        } else if self.secrets.has_cached_asymmetric_secret() {
            AtRestCrypto::AsymmetricSecret
        } else {
            AtRestCrypto::Plaintext
        }
    }

    fn store_standard(&self, message: &InboundMessage) -> StoredMessage {
        self.writer.insert(message, self.at_rest_preference())
    }

    /// Secure and end-session bodies are stored as ciphertext and handed to
    /// the background decryptor, which can only run with live key material.
    fn store_ciphertext(&self, message: &InboundMessage) -> StoredMessage {
        let stored = self.writer.insert(message, self.at_rest_preference());
        if self.secrets.live_secret().is_some() {
            self.deferred.schedule(stored.message_id);
        } else {
            tracing::debug!(
                message_id = stored.message_id,
                "key material locked, decrypt deferred until unlock"
            );
        }
        stored
    }

    async fn store_prekey_bundle(&self, message: &mut InboundMessage) -> StoredMessage {
        let Some(secret) = self.secrets.live_secret() else {
            // nothing to establish a session with; keep the bundle as-is
            return self.store_standard(message);
        };
        match self.try_prekey_bundle(&secret, message).await {
            Ok(stored) => stored,
            Err(e) => {
                self.record_failure(message, &e);
                self.store_standard(message)
            }
        }
    }

    async fn try_prekey_bundle(
        &self,
        secret: &LiveSecret,
        message: &InboundMessage,
    ) -> Result<StoredMessage, ProtocolError> {
        let bundle =
            encoding::decode_body(message.payload()).map_err(|_| ProtocolError::InvalidMessage)?;
        let recipient_id = self.directory.primary_recipient(&message.sender)?;
        let remote = RemoteDevice::new(recipient_id, message.sender_device_id);

        let decrypt = {
            let _guard = self.locks.acquire(remote).await;
            self.cipher.decrypt_prekey_bundle(secret, remote, &bundle)?
        };
        let plaintext =
            String::from_utf8(decrypt.plaintext).map_err(|_| ProtocolError::InvalidMessage)?;

        // store the inner ratchet message first so a crash between the two
        // writes leaves a decryptable row, then swap in the plaintext
        let mut provisional = message.clone();
        provisional.body = decrypt.session_body;
        let stored = self.writer.insert(&provisional, AtRestCrypto::LiveSecret);
        self.writer.update_body(stored.message_id, &plaintext);

        self.events.publish(SecurityEvent::SessionEstablished {
            thread_id: stored.thread_id,
        });
        tracing::info!(
            sender = %message.sender,
            thread_id = stored.thread_id,
            "session established from prekey bundle"
        );
        Ok(stored)
    }

    async fn store_key_exchange(&self, message: &mut InboundMessage) -> StoredMessage {
        let secret = match self.secrets.live_secret() {
            Some(s) if self.auto_respond_key_exchange => s,
            _ => return self.store_standard(message),
        };
        match self.try_key_exchange(&secret, message).await {
            Ok(stored) => stored,
            Err(e) => {
                self.record_failure(message, &e);
                self.store_standard(message)
            }
        }
    }

    async fn try_key_exchange(
        &self,
        secret: &LiveSecret,
        message: &mut InboundMessage,
    ) -> Result<StoredMessage, ProtocolError> {
        let exchange = encoding::decode_exchange(message.payload())
            .map_err(|_| ProtocolError::InvalidMessage)?;
        let recipient_id = self.directory.primary_recipient(&message.sender)?;
        let remote = RemoteDevice::new(recipient_id, message.sender_device_id);

        let reply = {
            let _guard = self.locks.acquire(remote).await;
            self.cipher.process_key_exchange(secret, remote, &exchange)?
        };

        message.set_outcome(Outcome::Processed);
        let stored = self.store_standard(message);
        if let Some(reply) = reply {
            tracing::info!(
                sender = %message.sender,
                thread_id = stored.thread_id,
                "answering key exchange"
            );
            self.outbox.enqueue(stored.thread_id, reply);
        }
        Ok(stored)
    }

    /// Convert a protocol failure into the message's terminal outcome.
    /// Untrusted identities are the one warning-only case.
    fn record_failure(&self, message: &mut InboundMessage, error: &ProtocolError) {
        match error.outcome() {
            Some(outcome) => {
                tracing::warn!(
                    sender = %message.sender,
                    error = %error,
                    outcome = ?outcome,
                    "session protocol failure"
                );
                message.set_outcome(outcome);
            }
            None => {
                tracing::warn!(sender = %message.sender, error = %error, "untrusted identity");
                if let ProtocolError::UntrustedIdentity { .. } = error {
                    self.events.publish(SecurityEvent::UntrustedIdentity {
                        sender: message.sender.clone(),
                    });
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
