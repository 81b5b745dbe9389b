//! In-memory collaborators.
//!
//! Durable storage lives outside this crate; these dashmap-backed
//! implementations serve the daemon's current needs and the tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;

use courier_core::message::{InboundMessage, MessageKind, Outcome};
use courier_core::protocol::{OutgoingExchange, ProtocolError, RemoteDevice};

use crate::oracle::SessionStore;
use crate::processor::{
    AtRestCrypto, DeferredDecryptQueue, MessageWriter, RecipientDirectory, ReplyOutbox,
    StoredMessage,
};

// ── Message store ─────────────────────────────────────────────────────────────

/// Snapshot of one persisted message.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub thread_id: u64,
    pub sender: String,
    pub body: String,
    pub kind: MessageKind,
    pub outcome: Option<Outcome>,
    pub at_rest: AtRestCrypto,
}

/// In-memory message store. One thread per sender.
#[derive(Clone, Default)]
pub struct MemoryMessageStore {
    messages: Arc<DashMap<u64, MessageRecord>>,
    /// Every body a message has carried, oldest first.
    history: Arc<DashMap<u64, Vec<String>>>,
    threads: Arc<DashMap<String, u64>>,
    next_message_id: Arc<AtomicU64>,
    next_thread_id: Arc<AtomicU64>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, message_id: u64) -> Option<MessageRecord> {
        self.messages.get(&message_id).map(|r| r.clone())
    }

    pub fn count(&self) -> usize {
        self.messages.len()
    }

    /// All bodies a message has carried, in write order.
    pub fn body_history(&self, message_id: u64) -> Vec<String> {
        self.history
            .get(&message_id)
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    fn thread_for(&self, sender: &str) -> u64 {
        *self
            .threads
            .entry(sender.to_string())
            .or_insert_with(|| self.next_thread_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

impl MessageWriter for MemoryMessageStore {
    fn insert(&self, message: &InboundMessage, at_rest: AtRestCrypto) -> StoredMessage {
        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1;
        let thread_id = self.thread_for(&message.sender);
        self.messages.insert(
            message_id,
            MessageRecord {
                thread_id,
                sender: message.sender.clone(),
                body: message.body.clone(),
                kind: message.kind,
                outcome: message.outcome(),
                at_rest,
            },
        );
        self.history
            .entry(message_id)
            .or_default()
            .push(message.body.clone());
        StoredMessage {
            message_id,
            thread_id,
        }
    }

    fn update_body(&self, message_id: u64, body: &str) {
        if let Some(mut record) = self.messages.get_mut(&message_id) {
            record.body = body.to_string();
        }
        self.history
            .entry(message_id)
            .or_default()
            .push(body.to_string());
    }
}

// ── Session store ─────────────────────────────────────────────────────────────

/// In-memory session records, keyed by remote device.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    versions: Arc<DashMap<RemoteDevice, u32>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, remote: RemoteDevice, version: u32) {
        self.versions.insert(remote, version);
    }
}

impl SessionStore for MemorySessionStore {
    fn load_version(&self, remote: RemoteDevice) -> Option<u32> {
        self.versions.get(&remote).map(|v| *v)
    }
}

// ── Directory / outbox / deferred queue ───────────────────────────────────────

/// Sender-string directory that canonicalizes on first sight.
#[derive(Clone, Default)]
pub struct MemoryRecipientDirectory {
    ids: Arc<DashMap<String, u64>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryRecipientDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecipientDirectory for MemoryRecipientDirectory {
    fn primary_recipient(&self, sender: &str) -> Result<u64, ProtocolError> {
        if sender.is_empty() {
            return Err(ProtocolError::UnresolvableSender);
        }
        Ok(*self
            .ids
            .entry(sender.to_string())
            .or_insert_with(|| self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
    }
}

/// Collects key-exchange replies instead of sending them.
#[derive(Default)]
pub struct MemoryReplyOutbox {
    replies: Mutex<Vec<(u64, OutgoingExchange)>>,
}

impl MemoryReplyOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<(u64, OutgoingExchange)> {
        std::mem::take(
            &mut *self
                .replies
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }
}

impl ReplyOutbox for MemoryReplyOutbox {
    fn enqueue(&self, thread_id: u64, reply: OutgoingExchange) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((thread_id, reply));
    }
}

/// Collects deferred-decrypt hand-offs.
#[derive(Default)]
pub struct MemoryDeferredQueue {
    scheduled: Mutex<Vec<u64>>,
}

impl MemoryDeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<u64> {
        std::mem::take(
            &mut *self
                .scheduled
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }
}

impl DeferredDecryptQueue for MemoryDeferredQueue {
    fn schedule(&self, message_id: u64) {
        self.scheduled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message_id);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
