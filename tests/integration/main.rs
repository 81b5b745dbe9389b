//! Courier integration test harness.
//!
//! Tests run against a real WebSocket relay stub on loopback: the stub
//! accepts the transport's upgrade, records the request URI, and exchanges
//! binary envelope frames like the production relay would. No TLS here —
//! the pinned-anchor path is covered by unit tests; these tests exercise
//! connection behavior.
//!
//! Every await that depends on the peer is wrapped in a timeout so a broken
//! transport fails the test instead of hanging the suite.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use courier_core::frame::{Envelope, RequestFrame};

mod transport;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A loopback relay. Accepts any number of connections over its lifetime.
pub struct RelayStub {
    pub addr: SocketAddr,
    conns: mpsc::UnboundedReceiver<RelayConn>,
}

/// One accepted connection, relay side.
pub struct RelayConn {
    /// Request URI the client used for the upgrade.
    pub uri: String,
    ws: WebSocketStream<TcpStream>,
}

impl RelayStub {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (tx, conns) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let tx = tx.clone();
                tokio::spawn(async move {
                    let uri = Arc::new(Mutex::new(String::new()));
                    let uri_probe = uri.clone();
                    let callback = move |req: &Request, resp: Response| {
                        *uri_probe.lock().unwrap() = req.uri().to_string();
                        Ok(resp)
                    };
                    if let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await {
                        let uri = uri.lock().unwrap().clone();
                        let _ = tx.send(RelayConn { uri, ws });
                    }
                });
            }
        });

        Ok(Self { addr, conns })
    }

    /// HTTP base URL the transport should be pointed at.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Wait for the next client connection.
    pub async fn accept(&mut self) -> Result<RelayConn> {
        tokio::time::timeout(TEST_TIMEOUT, self.conns.recv())
            .await
            .context("timed out waiting for a connection")?
            .context("stub closed")
    }
}

impl RelayConn {
    /// Push a request frame at the client.
    pub async fn push(&mut self, frame: RequestFrame) -> Result<()> {
        self.ws
            .send(Message::binary(Envelope::Request(frame).encode()?))
            .await?;
        Ok(())
    }

    /// Next binary envelope from the client. Skips control frames.
    pub async fn next_envelope(&mut self) -> Result<Envelope> {
        loop {
            let msg = tokio::time::timeout(TEST_TIMEOUT, self.ws.next())
                .await
                .context("timed out waiting for a frame")?
                .context("socket closed")??;
            if let Message::Binary(raw) = msg {
                return Ok(Envelope::decode(raw)?);
            }
        }
    }

    /// Drop the connection, relay side.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// A minimal relay request frame.
pub fn request(id: u64, body: &[u8]) -> RequestFrame {
    RequestFrame {
        id,
        verb: "PUT".to_string(),
        path: "/api/v1/message".to_string(),
        headers: Vec::new(),
        body: Some(bytes::Bytes::copy_from_slice(body)),
    }
}
