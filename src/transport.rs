//! Seams between the echo logic and the WebSocket library.
//!
//! [`FrameSource`] yields decoded frames, [`FrameSink`] writes them, and
//! [`ControlHandler`] is the capability the reader calls back into for ping and
//! close frames. [`read_message`] ties the three together.

use std::io::ErrorKind;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use fastwebsockets::WebSocketError;

use crate::message::Message;

/// Deadline for control frame writes (pong, close reply).
pub const WRITE_DEADLINE: Duration = Duration::from_secs(60);

pub const CLOSE_NORMAL: u16 = 1000;
/// Reserved code meaning the close frame carried no status.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// A frame as decoded by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Message(Message),
    Ping(Bytes),
    Pong(Bytes),
    Close { code: u16, reason: String },
}

/// Control frames the client writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    Pong(Bytes),
    /// Raw close payload: empty, or a big endian code followed by a reason.
    Close(Bytes),
}

#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    #[error("write deadline of {0:?} elapsed")]
    Timeout(Duration),
    #[error("connection already closed")]
    Closed,
    #[error("message with opcode {0} cannot be written")]
    Unsupported(u8),
    #[error(transparent)]
    Io(std::io::Error),
    #[error(transparent)]
    WebSocket(WebSocketError),
}

impl WriteError {
    /// Transient errors may succeed if retried: an elapsed deadline, or an I/O
    /// error of kind `TimedOut`, `WouldBlock` or `Interrupted`. Everything else,
    /// resets and broken pipes included, means the connection is unusable.
    pub fn is_transient(&self) -> bool {
        match self {
            WriteError::Timeout(_) => true,
            WriteError::Io(e) => matches!(
                e.kind(),
                ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

impl From<WebSocketError> for WriteError {
    fn from(e: WebSocketError) -> Self {
        match e {
            WebSocketError::IoError(io) => WriteError::Io(io),
            WebSocketError::ConnectionClosed => WriteError::Closed,
            other => WriteError::WebSocket(other),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    #[error("peer closed the connection (code {code}, reason {reason:?})")]
    Closed { code: u16, reason: String },
    #[error("ping handler failed: {0}")]
    Ping(#[source] WriteError),
    #[error(transparent)]
    Io(std::io::Error),
    #[error(transparent)]
    WebSocket(WebSocketError),
}

impl From<WebSocketError> for ReadError {
    fn from(e: WebSocketError) -> Self {
        match e {
            WebSocketError::IoError(io) => ReadError::Io(io),
            other => ReadError::WebSocket(other),
        }
    }
}

#[allow(async_fn_in_trait)]
pub trait FrameSource {
    async fn next_frame(&mut self) -> Result<Incoming, ReadError>;
}

/// Write half of a connection. Clones share the same underlying writer and
/// implementations serialise concurrent writes.
#[allow(async_fn_in_trait)]
pub trait FrameSink: Clone + 'static {
    async fn write_message(&self, message: &Message) -> Result<(), WriteError>;

    async fn write_control(&self, control: Control, deadline: Duration) -> Result<(), WriteError>;
}

/// Reactions to control frames. An error from `on_ping` aborts the read.
#[allow(async_fn_in_trait)]
pub trait ControlHandler {
    async fn on_close(&self, code: u16, reason: &str);

    async fn on_ping(&self, payload: &[u8]) -> Result<(), WriteError>;
}

/// Reads until the next data message, routing control frames to `handler`.
///
/// A close frame is handed to [`ControlHandler::on_close`] and then reported as
/// [`ReadError::Closed`]. Pongs are dropped.
pub async fn read_message<S, H>(source: &mut S, handler: &H) -> Result<Message, ReadError>
where
    S: FrameSource,
    H: ControlHandler,
{
    loop {
        match source.next_frame().await? {
            Incoming::Message(message) => return Ok(message),
            Incoming::Ping(payload) => handler.on_ping(&payload).await.map_err(ReadError::Ping)?,
            Incoming::Pong(payload) => {
                tracing::debug!(len = payload.len(), "Received pong message");
            }
            Incoming::Close { code, reason } => {
                handler.on_close(code, &reason).await;
                return Err(ReadError::Closed { code, reason });
            }
        }
    }
}

/// Close payload carrying `code` and an empty reason.
pub fn close_payload(code: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(2);
    buf.put_u16(code);
    buf.freeze()
}

/// Splits a received close payload into code and reason. An empty payload
/// maps to [`CLOSE_NO_STATUS`].
pub fn parse_close_payload(payload: &[u8]) -> (u16, String) {
    match payload {
        [hi, lo, reason @ ..] => (
            u16::from_be_bytes([*hi, *lo]),
            String::from_utf8_lossy(reason).into_owned(),
        ),
        _ => (CLOSE_NO_STATUS, String::new()),
    }
}
