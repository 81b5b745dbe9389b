//! courierd — push message daemon.
//!
//! Holds the persistent relay connection, feeds inbound messages through
//! the pipeline, and acknowledges each one back to the relay.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use courier_core::config::CourierConfig;
use courier_core::frame::{RequestFrame, ResponseFrame};
use courier_core::protocol::{
    LiveSecret, OutgoingExchange, PreKeyDecrypt, ProtocolError, RemoteDevice, SessionCipher,
};
use courier_pipeline::{
    assemble, Fragment, MemoryDeferredQueue, MemoryMessageStore, MemoryRecipientDirectory,
    MemoryReplyOutbox, PassthroughMultipart, SecretSource, SecureMessageProcessor,
    SecurityEventBus, SessionLocks,
};
use courier_transport::{tls, PushTransport, StaticCredentials, TransportError};

/// How long one blocking read waits before the loop re-checks shutdown.
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Relay path that carries inbound messages.
const MESSAGE_PATH: &str = "/api/v1/message";

/// JSON body of a relay message request.
#[derive(Debug, Deserialize)]
struct MessageEnvelope {
    sender: String,
    #[serde(default = "default_device_id")]
    sender_device_id: u32,
    fragments: Vec<String>,
}

fn default_device_id() -> u32 {
    1
}

/// The daemon runs without unlocked key material; ciphertext stays stored
/// until an unlock provides a live secret.
struct LockedSecrets;

impl SecretSource for LockedSecrets {
    fn live_secret(&self) -> Option<LiveSecret> {
        None
    }
    fn has_cached_asymmetric_secret(&self) -> bool {
        false
    }
}

/// Integration point for the ratchet library. Never reached while
/// `LockedSecrets` yields no live secret.
struct NoRatchet;

impl SessionCipher for NoRatchet {
    fn decrypt_prekey_bundle(
        &self,
        _secret: &LiveSecret,
        _remote: RemoteDevice,
        _bundle: &[u8],
    ) -> Result<PreKeyDecrypt, ProtocolError> {
        Err(ProtocolError::NoSession)
    }

    fn process_key_exchange(
        &self,
        _secret: &LiveSecret,
        _remote: RemoteDevice,
        _exchange: &[u8],
    ) -> Result<Option<OutgoingExchange>, ProtocolError> {
        Err(ProtocolError::NoSession)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = CourierConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = CourierConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        CourierConfig::default()
    });
    tracing::info!(relay = %config.relay.base_url, "courierd starting");

    // Pinned anchors are mandatory for TLS relays; a bad bundle is fatal
    let tls_config = if config.relay.base_url.starts_with("https://")
        || config.relay.base_url.starts_with("wss://")
    {
        Some(
            tls::pinned_client_config(&config.relay.trust_anchor_path)
                .context("loading relay trust anchors")?,
        )
    } else {
        tracing::warn!("plaintext relay URL, skipping TLS pinning");
        None
    };

    let credentials = Arc::new(StaticCredentials::new(
        config.relay.login.clone(),
        config.relay.password.clone(),
    ));
    let transport = PushTransport::new(config.relay.base_url.clone(), credentials, tls_config)
        .context("building push transport")?;

    // Pipeline
    let store = MemoryMessageStore::new();
    let outbox = Arc::new(MemoryReplyOutbox::new());
    let events = SecurityEventBus::new();
    let processor = SecureMessageProcessor::new(
        Arc::new(NoRatchet),
        Arc::new(store.clone()),
        Arc::new(LockedSecrets),
        Arc::new(MemoryRecipientDirectory::new()),
        outbox.clone(),
        Arc::new(MemoryDeferredQueue::new()),
        events.clone(),
        SessionLocks::new(),
        config.pipeline.auto_respond_key_exchange,
    );

    // Security event log
    {
        let mut rx = events.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                tracing::info!(event = ?event, "security event");
            }
        });
    }

    // Shutdown on ctrl-c
    {
        let transport = transport.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            transport.disconnect().await;
        });
    }

    transport.connect();

    // ── Read loop ────────────────────────────────────────────────────────────

    loop {
        let request = match transport.read_request(READ_TIMEOUT).await {
            Ok(request) => request,
            Err(TransportError::Timeout) => continue,
            Err(TransportError::ConnectionClosed) => break,
            Err(e) => {
                tracing::warn!(error = %e, "read failed");
                continue;
            }
        };

        let response = handle_request(&processor, &store, &request).await;
        if let Err(e) = transport.send_response(response).await {
            tracing::warn!(error = %e, id = request.id, "failed to acknowledge request");
        }

        for (thread_id, _reply) in outbox.drain() {
            tracing::info!(thread_id, "key exchange reply queued");
        }
    }

    tracing::info!(stored = store.count(), "courierd stopped");
    Ok(())
}

async fn handle_request(
    processor: &SecureMessageProcessor,
    store: &MemoryMessageStore,
    request: &RequestFrame,
) -> ResponseFrame {
    if request.verb != "PUT" || request.path != MESSAGE_PATH {
        tracing::debug!(verb = %request.verb, path = %request.path, "unroutable request");
        return ResponseFrame::status(request.id, 404, "Not found");
    }

    let Some(body) = &request.body else {
        return ResponseFrame::status(request.id, 400, "Bad request");
    };
    let envelope: MessageEnvelope = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(error = %e, id = request.id, "undecodable message envelope");
            return ResponseFrame::status(request.id, 400, "Bad request");
        }
    };

    let fragments: Vec<Fragment> = envelope
        .fragments
        .iter()
        .map(|body| Fragment {
            sender: envelope.sender.clone(),
            sender_device_id: envelope.sender_device_id,
            body: body.clone(),
        })
        .collect();

    match assemble(&fragments, &PassthroughMultipart) {
        Some(message) => {
            let kind = message.kind;
            let stored = processor.process(message).await;
            tracing::info!(
                message_id = stored.message_id,
                thread_id = stored.thread_id,
                kind = ?kind,
                total = store.count(),
                "message stored"
            );
            ResponseFrame::status(request.id, 200, "OK")
        }
        None => {
            tracing::debug!(id = request.id, "empty or incomplete fragment group");
            ResponseFrame::status(request.id, 200, "OK")
        }
    }
}
