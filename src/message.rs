use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;

/// Data frame type as seen on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Binary,
    /// Any other data opcode, carried verbatim.
    Other(u8),
}

impl MessageKind {
    pub fn opcode(self) -> u8 {
        match self {
            MessageKind::Text => 0x1,
            MessageKind::Binary => 0x2,
            MessageKind::Other(code) => code,
        }
    }
}

/// One application message. The payload is reference counted so an echo task
/// can hold it without copying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub payload: Bytes,
}

impl Message {
    pub fn new(kind: MessageKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::Text, payload)
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::Binary, payload)
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.payload)
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Log rendering: text as UTF-8 (lossy), everything else as base64.
impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MessageKind::Text => write!(
                f,
                "text message: {}",
                String::from_utf8_lossy(&self.payload)
            ),
            MessageKind::Binary => write!(f, "binary message. Base64: {}", self.to_base64()),
            MessageKind::Other(code) => write!(
                f,
                "unknown message type: {code}. Base64 of message: {}",
                self.to_base64()
            ),
        }
    }
}
