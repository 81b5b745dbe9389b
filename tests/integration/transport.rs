use crate::*;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use courier_core::frame::{Envelope, ResponseFrame};
use courier_core::protocol::{
    LiveSecret, OutgoingExchange, PreKeyDecrypt, ProtocolError, RemoteDevice, SessionCipher,
};
use courier_pipeline::{
    assemble, Fragment, MemoryDeferredQueue, MemoryMessageStore, MemoryRecipientDirectory,
    MemoryReplyOutbox, PassthroughMultipart, SecretSource, SecureMessageProcessor,
    SecurityEventBus, SessionLocks,
};
use courier_transport::{CredentialsProvider, PushTransport, StaticCredentials, TransportError};

fn creds() -> Arc<dyn CredentialsProvider> {
    Arc::new(StaticCredentials::new("alice", "hunter2"))
}

/// Transport that will never fire a keep-alive during the test.
fn quiet_transport(stub: &RelayStub) -> PushTransport {
    PushTransport::new(stub.base_url(), creds(), None)
        .expect("transport should build")
        .with_keepalive_interval(Duration::from_secs(3600))
}

#[tokio::test]
async fn requests_deliver_in_arrival_order() {
    let mut stub = RelayStub::start().await.unwrap();
    let transport = quiet_transport(&stub);
    transport.connect();

    let mut conn = stub.accept().await.unwrap();
    assert_eq!(conn.uri, "/v1/websocket/?login=alice&password=hunter2");

    for id in 1..=3u64 {
        conn.push(request(id, b"payload")).await.unwrap();
    }
    for id in 1..=3u64 {
        let frame = transport.read_request(TEST_TIMEOUT).await.unwrap();
        assert_eq!(frame.id, id, "requests must come out FIFO");
    }

    transport
        .send_response(ResponseFrame::status(3, 200, "OK"))
        .await
        .unwrap();
    match conn.next_envelope().await.unwrap() {
        Envelope::Response(resp) => {
            assert_eq!(resp.id, 3);
            assert_eq!(resp.status, 200);
        }
        other => panic!("expected a response frame, got {other:?}"),
    }

    transport.disconnect().await;
}

#[tokio::test]
async fn keepalive_probes_reach_the_relay() {
    let mut stub = RelayStub::start().await.unwrap();
    let transport = PushTransport::new(stub.base_url(), creds(), None)
        .unwrap()
        .with_keepalive_interval(Duration::from_millis(50));
    transport.connect();

    let mut conn = stub.accept().await.unwrap();
    let first = match conn.next_envelope().await.unwrap() {
        Envelope::Request(req) => req,
        other => panic!("expected a keepalive request, got {other:?}"),
    };
    assert_eq!(first.verb, "GET");
    assert_eq!(first.path, "/v1/keepalive");
    assert!(first.body.is_none());

    // probes keep coming with fresh timestamp ids
    let second = match conn.next_envelope().await.unwrap() {
        Envelope::Request(req) => req,
        other => panic!("expected a keepalive request, got {other:?}"),
    };
    assert_eq!(second.path, "/v1/keepalive");
    assert!(second.id >= first.id);

    transport.disconnect().await;
}

#[tokio::test]
async fn transport_heals_after_relay_drop() {
    let mut stub = RelayStub::start().await.unwrap();
    let transport = quiet_transport(&stub);
    transport.connect();

    let conn = stub.accept().await.unwrap();
    conn.close().await;

    // the transport reconnects on its own; no user action
    let mut conn = stub.accept().await.unwrap();
    conn.push(request(7, b"after-heal")).await.unwrap();
    let frame = transport.read_request(TEST_TIMEOUT).await.unwrap();
    assert_eq!(frame.id, 7);

    transport.disconnect().await;
}

#[tokio::test]
async fn queued_requests_drain_after_disconnect() {
    let mut stub = RelayStub::start().await.unwrap();
    let transport = quiet_transport(&stub);
    transport.connect();

    let mut conn = stub.accept().await.unwrap();
    conn.push(request(1, b"one")).await.unwrap();
    conn.push(request(2, b"two")).await.unwrap();

    assert_eq!(transport.read_request(TEST_TIMEOUT).await.unwrap().id, 1);
    // let the read loop enqueue the second frame before closing
    tokio::time::sleep(Duration::from_millis(200)).await;
    transport.disconnect().await;

    // already-queued requests still drain, then the closed state shows
    assert_eq!(
        transport
            .read_request(Duration::from_millis(10))
            .await
            .unwrap()
            .id,
        2
    );
    assert!(matches!(
        transport.read_request(Duration::from_millis(10)).await,
        Err(TransportError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn disconnect_during_dial_leaves_no_connection() {
    // relay that accepts TCP immediately but completes the WebSocket
    // handshake only on signal, pinning the client inside its dial
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (go_tx, go_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        go_rx.await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        // a closed-while-dialing client must tear this socket down, not
        // serve it
        loop {
            match tokio::time::timeout(TEST_TIMEOUT, ws.next()).await.unwrap() {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => continue,
            }
        }
    });

    let transport = PushTransport::new(format!("http://{addr}"), creds(), None)
        .unwrap()
        .with_keepalive_interval(Duration::from_secs(3600));
    transport.connect();
    tokio::time::sleep(Duration::from_millis(100)).await;

    transport.disconnect().await;
    go_tx.send(()).unwrap();

    server.await.unwrap();
    assert!(matches!(
        transport.read_request(Duration::from_millis(50)).await,
        Err(TransportError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn reconnect_after_user_close() {
    let mut stub = RelayStub::start().await.unwrap();
    let transport = quiet_transport(&stub);
    transport.connect();
    let _first = stub.accept().await.unwrap();

    // close and immediately reopen; the old loop may still be winding down
    transport.disconnect().await;
    transport.connect();

    let mut conn = stub.accept().await.unwrap();
    conn.push(request(5, b"again")).await.unwrap();
    assert_eq!(transport.read_request(TEST_TIMEOUT).await.unwrap().id, 5);
    transport.disconnect().await;
}

#[tokio::test]
async fn disconnect_completes_promptly_with_live_connection() {
    let mut stub = RelayStub::start().await.unwrap();
    let transport = PushTransport::new(stub.base_url(), creds(), None)
        .unwrap()
        .with_keepalive_interval(Duration::from_millis(10));
    transport.connect();
    let _conn = stub.accept().await.unwrap();

    // keep-alives are contending for the sink; disconnect must not wait on
    // them indefinitely
    tokio::time::sleep(Duration::from_millis(50)).await;
    tokio::time::timeout(Duration::from_secs(2), transport.disconnect())
        .await
        .expect("disconnect should not block");
    assert!(matches!(
        transport.read_request(Duration::from_millis(50)).await,
        Err(TransportError::ConnectionClosed)
    ));
}

// ── Full stack: relay frame → pipeline → acknowledgement ──────────────────────

struct NeverUnlocked;
impl SecretSource for NeverUnlocked {
    fn live_secret(&self) -> Option<LiveSecret> {
        None
    }
    fn has_cached_asymmetric_secret(&self) -> bool {
        false
    }
}

struct NoRatchet;
impl SessionCipher for NoRatchet {
    fn decrypt_prekey_bundle(
        &self,
        _secret: &LiveSecret,
        _remote: RemoteDevice,
        _bundle: &[u8],
    ) -> std::result::Result<PreKeyDecrypt, ProtocolError> {
        Err(ProtocolError::NoSession)
    }
    fn process_key_exchange(
        &self,
        _secret: &LiveSecret,
        _remote: RemoteDevice,
        _exchange: &[u8],
    ) -> std::result::Result<Option<OutgoingExchange>, ProtocolError> {
        Err(ProtocolError::NoSession)
    }
}

#[tokio::test]
async fn message_envelope_processed_end_to_end() {
    let mut stub = RelayStub::start().await.unwrap();
    let transport = quiet_transport(&stub);
    transport.connect();
    let mut conn = stub.accept().await.unwrap();

    let body = serde_json::json!({
        "sender": "+15550100",
        "sender_device_id": 1,
        "fragments": ["hello ", "courier"],
    });
    conn.push(request(11, &serde_json::to_vec(&body).unwrap()))
        .await
        .unwrap();

    let frame = transport.read_request(TEST_TIMEOUT).await.unwrap();
    let envelope: serde_json::Value =
        serde_json::from_slice(frame.body.as_ref().unwrap()).unwrap();
    let fragments: Vec<Fragment> = envelope["fragments"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| Fragment {
            sender: envelope["sender"].as_str().unwrap().to_string(),
            sender_device_id: 1,
            body: f.as_str().unwrap().to_string(),
        })
        .collect();
    let message = assemble(&fragments, &PassthroughMultipart).unwrap();
    assert_eq!(message.body, "hello courier");

    let store = MemoryMessageStore::new();
    let processor = SecureMessageProcessor::new(
        Arc::new(NoRatchet),
        Arc::new(store.clone()),
        Arc::new(NeverUnlocked),
        Arc::new(MemoryRecipientDirectory::new()),
        Arc::new(MemoryReplyOutbox::new()),
        Arc::new(MemoryDeferredQueue::new()),
        SecurityEventBus::new(),
        SessionLocks::new(),
        true,
    );
    let stored = processor.process(message).await;
    assert_eq!(store.get(stored.message_id).unwrap().body, "hello courier");

    transport
        .send_response(ResponseFrame::status(frame.id, 200, "OK"))
        .await
        .unwrap();
    match conn.next_envelope().await.unwrap() {
        Envelope::Response(resp) => assert_eq!(resp.id, 11),
        other => panic!("expected acknowledgement, got {other:?}"),
    }

    transport.disconnect().await;
}
