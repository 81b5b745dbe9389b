//! The persistent push connection.
//!
//! One `PushTransport` owns the socket to the relay for the life of the
//! process. `connect()` starts a connection loop that dials, serves until
//! the socket drops, and re-dials with linear backoff until `disconnect()`.
//! Inbound requests queue in arrival order; `read_request` blocks on them
//! with a deadline, and `send_response` answers over the same socket.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Notify};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};

use courier_core::frame::{Envelope, FrameError, RequestFrame, ResponseFrame};

use crate::credentials::CredentialsProvider;
use crate::tls::TlsError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Keep-alive probe interval.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Backoff ceiling between reconnect attempts.
pub const MAX_BACKOFF: Duration = Duration::from_secs(15);

/// How long disconnect() waits for a graceful socket close before leaving
/// teardown to the connection loop.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Upper bound on one keep-alive write.
const KEEPALIVE_SEND_TIMEOUT: Duration = Duration::from_secs(10);

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport was never started, or was closed by the user.
    #[error("connection closed")]
    ConnectionClosed,

    /// No request arrived before the deadline.
    #[error("timed out waiting for a request")]
    Timeout,

    #[error("unsupported relay URL: {0}")]
    InvalidUrl(String),

    /// A TLS relay URL was given without pinned anchors.
    #[error("relay URL {0} requires pinned trust anchors")]
    TlsRequired(String),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("socket write failed: {0}")]
    Write(#[source] tungstenite::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

// ── Backoff / URL derivation ──────────────────────────────────────────────────

/// Delay before reconnect attempt `attempt` (1-based): linear in 200ms
/// steps, capped at [`MAX_BACKOFF`].
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis((u64::from(attempt) * 200).min(MAX_BACKOFF.as_millis() as u64))
}

/// Derive the push socket URL from the relay's HTTP(S) base.
///
/// Credentials ride as query parameters; the relay answers the upgrade with
/// 101 only if they check out.
pub fn socket_url(base_url: &str, login: &str, password: &str) -> Result<String, TransportError> {
    let base = base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if base.starts_with("wss://") || base.starts_with("ws://") {
        base.to_string()
    } else {
        return Err(TransportError::InvalidUrl(base_url.to_string()));
    };
    Ok(format!(
        "{ws_base}/v1/websocket/?login={login}&password={password}"
    ))
}

fn requires_tls(base_url: &str) -> bool {
    base_url.starts_with("https://") || base_url.starts_with("wss://")
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── Shared state ──────────────────────────────────────────────────────────────

struct State {
    queue: VecDeque<RequestFrame>,
    /// True between connect() and disconnect(). Reconnects in between do
    /// not clear it.
    started: bool,
    user_closed: bool,
    loop_running: bool,
}

struct Shared {
    base_url: String,
    credentials: Arc<dyn CredentialsProvider>,
    tls: Option<Arc<rustls::ClientConfig>>,
    keepalive_interval: Duration,
    state: Mutex<State>,
    wake: Notify,
    sink: tokio::sync::Mutex<Option<WsSink>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn user_closed(&self) -> bool {
        self.lock().user_closed
    }
}

// ── PushTransport ─────────────────────────────────────────────────────────────

/// Handle on the push connection. Cheap to clone; all clones share one
/// socket and one request queue.
#[derive(Clone)]
pub struct PushTransport {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for PushTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushTransport").finish_non_exhaustive()
    }
}

impl PushTransport {
    /// Build a transport for the given relay base URL.
    ///
    /// `tls` carries the pinned-anchor client config and is mandatory for
    /// `https`/`wss` relays; plaintext `http`/`ws` relays (tests, loopback)
    /// take `None`.
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialsProvider>,
        tls: Option<Arc<rustls::ClientConfig>>,
    ) -> Result<Self, TransportError> {
        let base_url = base_url.into();
        // validate the scheme up front so connect() cannot fail on it
        socket_url(&base_url, "", "")?;
        if requires_tls(&base_url) && tls.is_none() {
            return Err(TransportError::TlsRequired(base_url));
        }
        Ok(Self {
            shared: Arc::new(Shared {
                base_url,
                credentials,
                tls,
                keepalive_interval: KEEPALIVE_INTERVAL,
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    started: false,
                    user_closed: false,
                    loop_running: false,
                }),
                wake: Notify::new(),
                sink: tokio::sync::Mutex::new(None),
            }),
        })
    }

    /// Override the keep-alive interval. Only effective before `connect()`
    /// and before the handle is cloned.
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.keepalive_interval = interval;
        }
        self
    }

    /// Start (or restart) the connection loop. Idempotent: a second call
    /// while the loop runs does nothing.
    pub fn connect(&self) {
        let spawn = {
            let mut state = self.shared.lock();
            state.started = true;
            state.user_closed = false;
            if state.loop_running {
                false
            } else {
                state.loop_running = true;
                true
            }
        };
        if spawn {
            let shared = self.shared.clone();
            tokio::spawn(connection_loop(shared));
        }
    }

    /// Close the connection for good. Wakes every blocked reader; the
    /// transport does not auto-heal after this.
    pub async fn disconnect(&self) {
        {
            let mut state = self.shared.lock();
            state.started = false;
            state.user_closed = true;
        }
        // readers must not wait on a stalled socket write
        self.shared.wake.notify_waiters();

        let close = async {
            if let Some(mut sink) = self.shared.sink.lock().await.take() {
                if let Err(e) = sink.close().await {
                    tracing::debug!(error = %e, "socket close failed");
                }
            }
        };
        if tokio::time::timeout(CLOSE_GRACE, close).await.is_err() {
            tracing::debug!("socket busy, leaving teardown to the connection loop");
        }
    }

    /// Take the oldest pending relay request, waiting up to `timeout`.
    ///
    /// Queued requests drain even after close; with an empty queue this
    /// returns `ConnectionClosed` once the transport is stopped, or
    /// `Timeout` when the deadline passes on a live transport (including
    /// while it is between reconnect attempts).
    pub async fn read_request(&self, timeout: Duration) -> Result<RequestFrame, TransportError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // register for wakeups before checking, so an enqueue between
            // the check and the await is not lost
            let notified = self.shared.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.shared.lock();
                if let Some(frame) = state.queue.pop_front() {
                    return Ok(frame);
                }
                if !state.started {
                    return Err(TransportError::ConnectionClosed);
                }
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => return Err(TransportError::Timeout),
            }
        }
    }

    /// Answer a relay request over the live socket.
    pub async fn send_response(&self, response: ResponseFrame) -> Result<(), TransportError> {
        send_envelope(&self.shared, Envelope::Response(response)).await
    }
}

async fn send_envelope(shared: &Shared, envelope: Envelope) -> Result<(), TransportError> {
    let raw = envelope.encode()?;
    let mut guard = shared.sink.lock().await;
    match guard.as_mut() {
        Some(sink) => sink
            .send(Message::binary(raw))
            .await
            .map_err(TransportError::Write),
        None => Err(TransportError::ConnectionClosed),
    }
}

// ── Connection loop ───────────────────────────────────────────────────────────

async fn connection_loop(shared: Arc<Shared>) {
    let mut attempt: u32 = 0;
    loop {
        if exit_or_rearm(&shared) {
            break;
        }
        match dial(&shared).await {
            Ok(mut stream) => {
                attempt = 0;
                if shared.user_closed() {
                    // disconnect() arrived while the dial was in flight;
                    // there was no sink for it to close yet
                    let _ = stream.close(None).await;
                    continue;
                }
                tracing::info!(relay = %shared.base_url, "push socket connected");
                serve(&shared, stream).await;
                if !shared.user_closed() {
                    tracing::warn!(relay = %shared.base_url, "push socket closed, reconnecting");
                }
            }
            Err(e) => {
                attempt += 1;
                let delay = backoff_delay(attempt);
                match &e {
                    tungstenite::Error::Http(resp) => tracing::warn!(
                        status = %resp.status(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "relay refused upgrade, backing off"
                    ),
                    other => tracing::warn!(
                        error = %other,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "connect failed, backing off"
                    ),
                }
                tokio::time::sleep(delay).await;
            }
        }
    }

    shared.wake.notify_waiters();
}

/// Decide under the state lock whether the loop is done. connect() may
/// have been called again since the close; the loop then keeps running
/// instead of racing a fresh spawn.
fn exit_or_rearm(shared: &Shared) -> bool {
    let mut state = shared.lock();
    if state.user_closed || !state.started {
        state.loop_running = false;
        true
    } else {
        false
    }
}

async fn dial(shared: &Shared) -> Result<WsStream, tungstenite::Error> {
    let url = socket_url(
        &shared.base_url,
        &shared.credentials.login(),
        &shared.credentials.password(),
    )
    .map_err(|_| tungstenite::Error::Url(tungstenite::error::UrlError::UnsupportedUrlScheme))?;
    let connector = shared.tls.clone().map(Connector::Rustls);
    // Ok here means the relay answered 101; anything else is Error::Http
    let (stream, _response) = connect_async_tls_with_config(url, None, false, connector).await?;
    Ok(stream)
}

/// Serve one live socket until it drops.
async fn serve(shared: &Arc<Shared>, stream: WsStream) {
    let (sink, mut read) = stream.split();
    *shared.sink.lock().await = Some(sink);
    if shared.user_closed() {
        // closed between the dial and the sink hand-off
        if let Some(mut sink) = shared.sink.lock().await.take() {
            let _ = sink.close().await;
        }
        shared.wake.notify_waiters();
        return;
    }
    shared.wake.notify_waiters();

    let (stop_tx, _) = broadcast::channel::<()>(1);
    let keepalive = tokio::spawn(keepalive_loop(
        shared.clone(),
        shared.keepalive_interval,
        stop_tx.subscribe(),
    ));

    while let Some(item) = read.next().await {
        match item {
            Ok(Message::Binary(raw)) => match Envelope::decode(raw) {
                Ok(Envelope::Request(frame)) => {
                    tracing::debug!(id = frame.id, verb = %frame.verb, path = %frame.path, "request frame");
                    shared.lock().queue.push_back(frame);
                    shared.wake.notify_waiters();
                }
                Ok(Envelope::Response(resp)) => {
                    tracing::debug!(id = resp.id, status = resp.status, "response frame");
                    shared.wake.notify_waiters();
                }
                Err(e) => tracing::warn!(error = %e, "malformed frame dropped"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {} // ping/pong/text are not part of the protocol
            Err(e) => {
                tracing::warn!(error = %e, "socket read failed");
                break;
            }
        }
    }

    let _ = stop_tx.send(());
    let _ = keepalive.await;
    *shared.sink.lock().await = None;
    shared.wake.notify_waiters();
}

/// Probe the relay every interval so NAT and relay-side idle timers never
/// fire. Send failures are logged, not fatal; the read loop decides when
/// the connection is dead.
async fn keepalive_loop(
    shared: Arc<Shared>,
    interval: Duration,
    mut stop: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = stop.recv() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        let frame = RequestFrame::keepalive(now_millis());
        // bound the write so a stalled socket cannot hold the sink lock
        // against disconnect()
        match tokio::time::timeout(
            KEEPALIVE_SEND_TIMEOUT,
            send_envelope(&shared, Envelope::Request(frame)),
        )
        .await
        {
            Ok(Ok(())) => tracing::debug!("keepalive sent"),
            Ok(Err(e)) => tracing::warn!(error = %e, "keepalive send failed"),
            Err(_) => tracing::warn!("keepalive send stalled"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
