//! courier-pipeline — from raw inbound fragments to stored messages.

pub mod events;
pub mod intake;
pub mod locks;
pub mod oracle;
pub mod processor;
pub mod store;

pub use events::{SecurityEvent, SecurityEventBus};
pub use intake::{assemble, Fragment, MultipartHandler, PassthroughMultipart};
pub use locks::SessionLocks;
pub use oracle::{NoSessionError, SessionOracle, SessionStore};
pub use processor::{
    AtRestCrypto, DeferredDecryptQueue, MessageWriter, RecipientDirectory, ReplyOutbox,
    SecretSource, SecureMessageProcessor, StoredMessage,
};
pub use store::{
    MemoryDeferredQueue, MemoryMessageStore, MemoryRecipientDirectory, MemoryReplyOutbox,
    MemorySessionStore, MessageRecord,
};
