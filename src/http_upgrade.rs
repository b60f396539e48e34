use base64::{Engine as _, engine::general_purpose::STANDARD as b64};
use httparse::Status;
use memchr::memmem::Finder;
use monoio_compat::{AsyncReadExt, AsyncWriteExt};
use rand::RngCore;
use sha1::{Digest, Sha1};
use smallvec::SmallVec;
use std::io::{Error as IoError, ErrorKind};

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const MAX_RESPONSE_HEADER: usize = 16 * 1024;

#[derive(thiserror::Error, Debug)]
pub enum UpgradeErr {
    #[error("eof during handshake")]
    Eof,
    #[error("oversized handshake")]
    Oversized,
    #[error("non-101 status line")]
    Status,
    #[error("missing upgrade headers")]
    Headers,
    #[error("bad Sec-WebSocket-Accept")]
    Accept,
    #[error("server selected sub-protocol {0:?} which was not offered")]
    Protocol(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Utf8(#[from] std::str::Utf8Error),
}

pub struct ClientKey {
    pub sec_websocket_key: String,
    pub expected_accept: String,
}

pub fn generate_client_key() -> ClientKey {
    let mut key_bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut key_bytes);
    let sec_websocket_key = b64.encode(key_bytes);
    let expected_accept = accept_for_key(&sec_websocket_key);

    ClientKey {
        sec_websocket_key,
        expected_accept,
    }
}

/// `Sec-WebSocket-Accept` value a server must answer for `key`.
pub fn accept_for_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WS_GUID.as_bytes());
    b64.encode(sha1.finalize())
}

/// Everything that goes into the client's upgrade request.
pub struct UpgradeRequest<'a> {
    pub host: &'a str,
    pub path_and_query: &'a str,
    pub sec_websocket_key: &'a str,
    /// Offered sub-protocols, in preference order. Empty means no header.
    pub protocols: &'a [String],
}

/// Outcome of a successful upgrade.
#[derive(Debug, Default)]
pub struct UpgradeResponse {
    /// Sub-protocol chosen by the server, if any.
    pub protocol: Option<String>,
    /// Bytes read past the end of the response headers. These already belong
    /// to the WebSocket stream.
    pub leftover: Vec<u8>,
}

pub fn encode_request(req: &UpgradeRequest<'_>) -> Result<SmallVec<[u8; 512]>, UpgradeErr> {
    const REQUEST_PREFIX: &[u8] = b"GET ";
    const REQUEST_SUFFIX: &[u8] = b" HTTP/1.1\r\nHost: ";
    const UPGRADE_HEADERS: &[u8] = b"\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Version: 13\r\nSec-WebSocket-Key: ";
    const PROTOCOL_HEADER: &[u8] = b"Sec-WebSocket-Protocol: ";
    const CRLF: &[u8] = b"\r\n";

    let too_large = || {
        UpgradeErr::Io(IoError::new(
            ErrorKind::Other,
            "request headers exceed maximum buffer size",
        ))
    };

    let protocols = req.protocols.join(", ");
    let protocol_len = if protocols.is_empty() {
        0
    } else {
        PROTOCOL_HEADER.len() + protocols.len() + CRLF.len()
    };

    let base_len = REQUEST_PREFIX.len()
        + req.path_and_query.len()
        + REQUEST_SUFFIX.len()
        + req.host.len()
        + UPGRADE_HEADERS.len()
        + req.sec_websocket_key.len()
        + CRLF.len() // after Sec-WebSocket-Key
        + CRLF.len(); // terminating CRLF

    let total_len = base_len.checked_add(protocol_len).ok_or_else(too_large)?;

    let mut buffer = SmallVec::<[u8; 512]>::new();
    buffer.try_reserve(total_len).map_err(|_| {
        UpgradeErr::Io(IoError::new(
            ErrorKind::Other,
            "failed to reserve request buffer",
        ))
    })?;

    buffer.extend_from_slice(REQUEST_PREFIX);
    buffer.extend_from_slice(req.path_and_query.as_bytes());
    buffer.extend_from_slice(REQUEST_SUFFIX);
    buffer.extend_from_slice(req.host.as_bytes());
    buffer.extend_from_slice(UPGRADE_HEADERS);
    buffer.extend_from_slice(req.sec_websocket_key.as_bytes());
    buffer.extend_from_slice(CRLF);

    if !protocols.is_empty() {
        buffer.extend_from_slice(PROTOCOL_HEADER);
        buffer.extend_from_slice(protocols.as_bytes());
        buffer.extend_from_slice(CRLF);
    }

    buffer.extend_from_slice(CRLF);
    Ok(buffer)
}

pub async fn write_request<S>(stream: &mut S, req: &UpgradeRequest<'_>) -> Result<(), UpgradeErr>
where
    S: AsyncWriteExt + Unpin,
{
    let buffer = encode_request(req)?;
    stream.write_all(&buffer).await?;
    stream.flush().await?;
    Ok(())
}

pub async fn read_response<S>(
    stream: &mut S,
    expected_accept: &str,
    offered: &[String],
) -> Result<UpgradeResponse, UpgradeErr>
where
    S: AsyncReadExt + Unpin,
{
    let mut hdr = Vec::with_capacity(2048);
    let mut chunk = [0u8; 1024];
    let finder = Finder::new(b"\r\n\r\n");
    let mut scan_pos = 0;

    loop {
        if finder.find(&hdr[scan_pos..]).is_some() {
            break;
        }

        scan_pos = hdr.len().saturating_sub(3);

        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(UpgradeErr::Eof);
        }

        hdr.extend_from_slice(&chunk[..n]);
        if hdr.len() > MAX_RESPONSE_HEADER {
            return Err(UpgradeErr::Oversized);
        }
    }

    parse_response(&hdr, expected_accept, offered)
}

/// Validates a complete 101 response held in `data`.
pub fn parse_response(
    data: &[u8],
    expected_accept: &str,
    offered: &[String],
) -> Result<UpgradeResponse, UpgradeErr> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut response = httparse::Response::new(&mut headers);
    let header_len = match response.parse(data) {
        Ok(Status::Complete(len)) => len,
        _ => return Err(UpgradeErr::Headers),
    };

    if response.code != Some(101) {
        return Err(UpgradeErr::Status);
    }

    let connection = find_header(response.headers, "Connection").ok_or(UpgradeErr::Headers)?;
    if !header_has_token(connection, "upgrade")? {
        return Err(UpgradeErr::Headers);
    }

    let upgrade = find_header(response.headers, "Upgrade").ok_or(UpgradeErr::Headers)?;
    if !value_eq_ascii(upgrade, "websocket")? {
        return Err(UpgradeErr::Headers);
    }

    let accept =
        find_header(response.headers, "Sec-WebSocket-Accept").ok_or(UpgradeErr::Headers)?;
    if std::str::from_utf8(accept)? != expected_accept {
        return Err(UpgradeErr::Accept);
    }

    let protocol = match find_header(response.headers, "Sec-WebSocket-Protocol") {
        Some(value) => {
            let chosen = std::str::from_utf8(value)?.trim();
            if !offered.iter().any(|p| p == chosen) {
                return Err(UpgradeErr::Protocol(chosen.to_owned()));
            }
            Some(chosen.to_owned())
        }
        None => None,
    };

    Ok(UpgradeResponse {
        protocol,
        leftover: data[header_len..].to_vec(),
    })
}

fn find_header<'a>(headers: &'a [httparse::Header<'a>], name: &str) -> Option<&'a [u8]> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value)
}

fn value_eq_ascii(value: &[u8], token: &str) -> Result<bool, std::str::Utf8Error> {
    Ok(std::str::from_utf8(value)?.eq_ignore_ascii_case(token))
}

fn header_has_token(value: &[u8], token: &str) -> Result<bool, std::str::Utf8Error> {
    let text = std::str::from_utf8(value)?;
    Ok(text
        .split(',')
        .any(|part| part.trim().eq_ignore_ascii_case(token)))
}
