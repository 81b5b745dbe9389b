//! Relay wire format — the framed envelope exchanged over the push socket.
//!
//! Every binary WebSocket message carries exactly one envelope: a one-byte
//! frame type followed by either a request or a response frame. Strings and
//! header entries are u16-length-prefixed UTF-8, bodies are an optional
//! u32-length-prefixed byte run. All integers are big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Frame type byte for a request envelope.
pub const FRAME_REQUEST: u8 = 1;
/// Frame type byte for a response envelope.
pub const FRAME_RESPONSE: u8 = 2;

/// Verb sent on every keep-alive probe.
pub const KEEPALIVE_VERB: &str = "GET";
/// Relay path probed to keep the connection warm.
pub const KEEPALIVE_PATH: &str = "/v1/keepalive";

// ── Envelope ──────────────────────────────────────────────────────────────────

/// One framed message on the push socket, either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    Request(RequestFrame),
    Response(ResponseFrame),
}

/// A relay-initiated (or keep-alive) request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    /// Correlation id. The matching response must echo it.
    pub id: u64,
    pub verb: String,
    pub path: String,
    pub headers: Vec<String>,
    pub body: Option<Bytes>,
}

/// The client's answer to a relay request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    /// Echoes the request id it answers.
    pub id: u64,
    pub status: u32,
    pub message: String,
    pub headers: Vec<String>,
    pub body: Option<Bytes>,
}

impl RequestFrame {
    /// Build a keep-alive probe with the given correlation id.
    pub fn keepalive(id: u64) -> Self {
        Self {
            id,
            verb: KEEPALIVE_VERB.to_string(),
            path: KEEPALIVE_PATH.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }
}

impl ResponseFrame {
    /// A bare status response answering `request_id`.
    pub fn status(request_id: u64, status: u32, message: &str) -> Self {
        Self {
            id: request_id,
            status,
            message: message.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting envelope bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame truncated while reading {0}")]
    Truncated(&'static str),

    #[error("unknown frame type byte: 0x{0:02x}")]
    UnknownFrameType(u8),

    #[error("frame field {0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    #[error("frame field {0} exceeds its length prefix")]
    Oversized(&'static str),
}

// ── Encoding ──────────────────────────────────────────────────────────────────

impl Envelope {
    /// Fails with `Oversized` when a field does not fit its length prefix;
    /// nothing is ever written with a wrapped length.
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        let mut buf = BytesMut::with_capacity(64);
        match self {
            Envelope::Request(req) => {
                buf.put_u8(FRAME_REQUEST);
                buf.put_u64(req.id);
                put_string(&mut buf, &req.verb, "verb")?;
                put_string(&mut buf, &req.path, "path")?;
                put_headers(&mut buf, &req.headers)?;
                put_body(&mut buf, req.body.as_ref())?;
            }
            Envelope::Response(resp) => {
                buf.put_u8(FRAME_RESPONSE);
                buf.put_u64(resp.id);
                buf.put_u32(resp.status);
                put_string(&mut buf, &resp.message, "message")?;
                put_headers(&mut buf, &resp.headers)?;
                put_body(&mut buf, resp.body.as_ref())?;
            }
        }
        Ok(buf.freeze())
    }

    pub fn decode(mut bytes: Bytes) -> Result<Self, FrameError> {
        if bytes.remaining() < 1 {
            return Err(FrameError::Truncated("frame type"));
        }
        match bytes.get_u8() {
            FRAME_REQUEST => {
                let id = get_u64(&mut bytes, "request id")?;
                let verb = get_string(&mut bytes, "verb")?;
                let path = get_string(&mut bytes, "path")?;
                let headers = get_headers(&mut bytes)?;
                let body = get_body(&mut bytes)?;
                Ok(Envelope::Request(RequestFrame {
                    id,
                    verb,
                    path,
                    headers,
                    body,
                }))
            }
            FRAME_RESPONSE => {
                let id = get_u64(&mut bytes, "response id")?;
                let status = get_u32(&mut bytes, "status")?;
                let message = get_string(&mut bytes, "message")?;
                let headers = get_headers(&mut bytes)?;
                let body = get_body(&mut bytes)?;
                Ok(Envelope::Response(ResponseFrame {
                    id,
                    status,
                    message,
                    headers,
                    body,
                }))
            }
            other => Err(FrameError::UnknownFrameType(other)),
        }
    }
}

fn put_string(buf: &mut BytesMut, s: &str, field: &'static str) -> Result<(), FrameError> {
    if s.len() > usize::from(u16::MAX) {
        return Err(FrameError::Oversized(field));
    }
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn put_headers(buf: &mut BytesMut, headers: &[String]) -> Result<(), FrameError> {
    if headers.len() > usize::from(u16::MAX) {
        return Err(FrameError::Oversized("header count"));
    }
    buf.put_u16(headers.len() as u16);
    for h in headers {
        put_string(buf, h, "header")?;
    }
    Ok(())
}

fn put_body(buf: &mut BytesMut, body: Option<&Bytes>) -> Result<(), FrameError> {
    match body {
        Some(b) => {
            if u32::try_from(b.len()).is_err() {
                return Err(FrameError::Oversized("body"));
            }
            buf.put_u8(1);
            buf.put_u32(b.len() as u32);
            buf.put_slice(b);
        }
        None => buf.put_u8(0),
    }
    Ok(())
}

fn get_u64(bytes: &mut Bytes, field: &'static str) -> Result<u64, FrameError> {
    if bytes.remaining() < 8 {
        return Err(FrameError::Truncated(field));
    }
    Ok(bytes.get_u64())
}

fn get_u32(bytes: &mut Bytes, field: &'static str) -> Result<u32, FrameError> {
    if bytes.remaining() < 4 {
        return Err(FrameError::Truncated(field));
    }
    Ok(bytes.get_u32())
}

fn get_string(bytes: &mut Bytes, field: &'static str) -> Result<String, FrameError> {
    if bytes.remaining() < 2 {
        return Err(FrameError::Truncated(field));
    }
    let len = bytes.get_u16() as usize;
    if bytes.remaining() < len {
        return Err(FrameError::Truncated(field));
    }
    let raw = bytes.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| FrameError::InvalidUtf8(field))
}

fn get_headers(bytes: &mut Bytes) -> Result<Vec<String>, FrameError> {
    if bytes.remaining() < 2 {
        return Err(FrameError::Truncated("header count"));
    }
    let count = bytes.get_u16() as usize;
    let mut headers = Vec::with_capacity(count);
    for _ in 0..count {
        headers.push(get_string(bytes, "header")?);
    }
    Ok(headers)
}

fn get_body(bytes: &mut Bytes) -> Result<Option<Bytes>, FrameError> {
    if bytes.remaining() < 1 {
        return Err(FrameError::Truncated("body flag"));
    }
    if bytes.get_u8() == 0 {
        return Ok(None);
    }
    if bytes.remaining() < 4 {
        return Err(FrameError::Truncated("body length"));
    }
    let len = bytes.get_u32() as usize;
    if bytes.remaining() < len {
        return Err(FrameError::Truncated("body"));
    }
    Ok(Some(bytes.split_to(len)))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
