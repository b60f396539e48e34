use std::cell::Cell;
use std::io;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use fastwebsockets::{
    Frame, FragmentCollectorRead, OpCode, Payload, Role, WebSocket, WebSocketWrite,
};
use monoio::net::TcpStream;
use monoio_compat::StreamWrapper;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

use crate::http_upgrade::{
    UpgradeErr, UpgradeRequest, generate_client_key, read_response, write_request,
};
use crate::message::{Message, MessageKind};
use crate::tls::{self, TlsErr};
use crate::transport::{
    CLOSE_NORMAL, Control, FrameSink, FrameSource, Incoming, ReadError, WRITE_DEADLINE,
    WriteError, close_payload, parse_close_payload,
};
use crate::url::{Scheme, UrlError, WsUrl, parse_ws_or_wss};

#[derive(thiserror::Error, Debug)]
pub enum ConnectError {
    #[error("invalid address: {0}")]
    Url(#[from] UrlError),
    #[error("tls: {0}")]
    Tls(#[from] TlsErr),
    #[error("handshake: {0}")]
    Upgrade(#[from] UpgradeErr),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Transport failures while upgrading surface as dial errors.
fn dial_failure(err: UpgradeErr) -> ConnectError {
    match err {
        UpgradeErr::Io(e) => ConnectError::Io(e),
        UpgradeErr::Eof => ConnectError::Io(io::ErrorKind::UnexpectedEof.into()),
        other => ConnectError::Upgrade(other),
    }
}

/// Plain TCP or TLS over TCP, both wrapped in `monoio_compat::StreamWrapper` to
/// provide tokio's AsyncRead/AsyncWrite.
#[allow(clippy::large_enum_variant)]
pub enum AnyStream {
    Plain(StreamWrapper<TcpStream>),
    Tls(StreamWrapper<monoio_rustls::ClientTlsStream<TcpStream>>),
}

impl AsyncRead for AnyStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            AnyStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            AnyStream::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for AnyStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            AnyStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            AnyStream::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            AnyStream::Plain(s) => Pin::new(s).poll_flush(cx),
            AnyStream::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            AnyStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            AnyStream::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Replays bytes that were read past the end of the handshake before reading
/// from the inner stream again.
pub struct Prefixed<S> {
    prefix: Vec<u8>,
    pos: usize,
    inner: S,
}

impl<S> Prefixed<S> {
    pub fn new(prefix: Vec<u8>, inner: S) -> Self {
        Self {
            prefix,
            pos: 0,
            inner,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Prefixed<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.pos < this.prefix.len() {
            let n = (this.prefix.len() - this.pos).min(buf.remaining());
            buf.put_slice(&this.prefix[this.pos..this.pos + n]);
            this.pos += n;
            if this.pos == this.prefix.len() {
                this.prefix = Vec::new();
                this.pos = 0;
            }
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Prefixed<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Exposed stream type used by `WsClient`.
pub type WsStream = Prefixed<AnyStream>;

pub struct WsClient {
    pub ws: WebSocket<WsStream>,
    url: WsUrl,
    protocol: Option<String>,
}

impl WsClient {
    /// Connect to a `ws://` or `wss://` URL and complete the WebSocket handshake,
    /// offering `protocols` as sub-protocols.
    ///
    /// Automatic pong and close replies are disabled; the caller answers control
    /// frames through [`crate::transport::ControlHandler`].
    pub async fn connect(url: &str, protocols: &[String]) -> Result<Self, ConnectError> {
        let u = parse_ws_or_wss(url)?;
        tracing::debug!(host = %u.host, port = u.port, scheme = ?u.scheme, "Dialing");

        let tcp = TcpStream::connect((u.host.as_str(), u.port)).await?;
        let mut stream = match u.scheme {
            Scheme::Ws => AnyStream::Plain(StreamWrapper::new(tcp)),
            Scheme::Wss => {
                let tls = tls::handshake(tcp, &u.host).await?;
                AnyStream::Tls(StreamWrapper::new(tls))
            }
        };

        let key = generate_client_key();
        let host = u.host_header();
        let request = UpgradeRequest {
            host: &host,
            path_and_query: &u.path_and_query,
            sec_websocket_key: &key.sec_websocket_key,
            protocols,
        };
        write_request(&mut stream, &request)
            .await
            .map_err(dial_failure)?;
        let response = read_response(&mut stream, &key.expected_accept, protocols)
            .await
            .map_err(dial_failure)?;

        let mut ws = WebSocket::after_handshake(
            Prefixed::new(response.leftover, stream),
            Role::Client,
        );
        ws.set_auto_close(false);
        ws.set_auto_pong(false);
        if matches!(u.scheme, Scheme::Wss) {
            // TLS backends generally buffer writes, so gathering is less effective.
            ws.set_writev(false);
        }

        Ok(Self {
            ws,
            url: u,
            protocol: response.protocol,
        })
    }

    pub fn url(&self) -> &WsUrl {
        &self.url
    }

    /// Sub-protocol selected by the server.
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Splits the connection so reads never wait behind writes.
    pub fn split(self) -> (WsReader, WsWriter) {
        let (read, write) = self.ws.split(tokio::io::split);
        let writer = WsWriter {
            inner: Rc::new(Mutex::new(write)),
            closed: Rc::new(Cell::new(false)),
        };
        let reader = WsReader {
            inner: FragmentCollectorRead::new(read),
            writer: writer.clone(),
        };
        (reader, writer)
    }
}

/// Read half. Fragmented messages are reassembled before they are returned.
pub struct WsReader {
    inner: FragmentCollectorRead<ReadHalf<WsStream>>,
    writer: WsWriter,
}

impl FrameSource for WsReader {
    async fn next_frame(&mut self) -> Result<Incoming, ReadError> {
        let writer = self.writer.clone();
        // Only invoked for replies the library itself owes the peer.
        let mut obligated = move |frame| {
            let frame = owned_frame(&frame);
            let writer = writer.clone();
            async move { writer.write_frame(frame).await }
        };

        let frame = self.inner.read_frame(&mut obligated).await?;
        let payload = Bytes::copy_from_slice(&frame.payload);
        Ok(match frame.opcode {
            OpCode::Text => Incoming::Message(Message::text(payload)),
            OpCode::Binary => Incoming::Message(Message::binary(payload)),
            OpCode::Continuation => Incoming::Message(Message::new(MessageKind::Other(0), payload)),
            OpCode::Ping => Incoming::Ping(payload),
            OpCode::Pong => Incoming::Pong(payload),
            OpCode::Close => {
                let (code, reason) = parse_close_payload(&payload);
                Incoming::Close { code, reason }
            }
        })
    }
}

type SharedWrite = Rc<Mutex<WebSocketWrite<WriteHalf<WsStream>>>>;

/// Write half shared by the read loop, echo tasks and control replies. The
/// mutex serialises frames; the read half never takes it.
#[derive(Clone)]
pub struct WsWriter {
    inner: SharedWrite,
    closed: Rc<Cell<bool>>,
}

impl WsWriter {
    async fn write_frame(&self, frame: Frame<'_>) -> Result<(), WriteError> {
        if self.closed.get() {
            return Err(WriteError::Closed);
        }
        let is_close = frame.opcode == OpCode::Close;
        let mut ws = self.inner.lock().await;
        ws.write_frame(frame).await?;
        if is_close {
            self.closed.set(true);
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Best effort normal close, skipped when a close frame was already sent.
    pub async fn close(&self) {
        if self.is_closed() {
            return;
        }
        let control = Control::Close(close_payload(CLOSE_NORMAL));
        if let Err(err) = self.write_control(control, WRITE_DEADLINE).await {
            tracing::debug!(error = %err, "Close frame not delivered");
        }
    }
}

impl FrameSink for WsWriter {
    async fn write_message(&self, message: &Message) -> Result<(), WriteError> {
        let payload = Payload::Owned(message.payload.to_vec());
        let frame = match message.kind {
            MessageKind::Text => Frame::text(payload),
            MessageKind::Binary => Frame::binary(payload),
            MessageKind::Other(code) => return Err(WriteError::Unsupported(code)),
        };
        self.write_frame(frame).await
    }

    async fn write_control(&self, control: Control, deadline: Duration) -> Result<(), WriteError> {
        let frame = match control {
            Control::Pong(payload) => Frame::pong(Payload::Owned(payload.to_vec())),
            Control::Close(payload) => Frame::close_raw(Payload::Owned(payload.to_vec())),
        };
        monoio::time::timeout(deadline, self.write_frame(frame))
            .await
            .map_err(|_| WriteError::Timeout(deadline))?
    }
}

fn owned_frame(frame: &Frame<'_>) -> Frame<'static> {
    Frame::new(
        frame.fin,
        frame.opcode,
        None,
        Payload::Owned(frame.payload.to_vec()),
    )
}
