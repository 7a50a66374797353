//! Content-Length message framing for JSON-RPC over stdio.
//!
//! This is the framing used by the Language Server Protocol on both sides of
//! the wrapper: the editor's stdio and the language server's pipes.
//!
//! # Wire Format
//!
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <message-body>
//! ```
//!
//! Header parsing accepts any ASCII case for `Content-Length` and both CRLF
//! and LF line endings. Encoding always emits the canonical form with CRLF.

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default cap on a single message body (100MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Longest header line accepted, including its line ending.
pub const MAX_HEADER_LINE_LEN: usize = 8 * 1024;

/// The only protocol version the wrapper accepts.
pub const JSONRPC_VERSION: &str = "2.0";

/// Failures while decoding or constructing a framed message.
///
/// Framing is positional, so none of these can be resynchronized in place:
/// the pump that hits one stops and the engine shuts down.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("header block ended without a Content-Length header")]
    MissingContentLength,

    #[error("invalid header line: {0:?}")]
    InvalidHeader(String),

    #[error("invalid Content-Length value: {0:?}")]
    InvalidContentLength(String),

    #[error("message size {size} exceeds maximum {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    #[error("stream ended inside a message ({context})")]
    UnexpectedEof { context: &'static str },

    #[error("message body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("message body is not a JSON object")]
    NotAnObject,

    #[error("invalid jsonrpc version: {0}")]
    InvalidVersion(String),

    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}

impl CodecError {
    /// Stable short code used as a structured log field.
    pub fn code(&self) -> &'static str {
        match self {
            CodecError::MissingContentLength => "missing_content_length",
            CodecError::InvalidHeader(_) => "invalid_header",
            CodecError::InvalidContentLength(_) => "invalid_content_length",
            CodecError::MessageTooLarge { .. } => "message_too_large",
            CodecError::UnexpectedEof { .. } => "unexpected_eof",
            CodecError::InvalidJson(_) => "invalid_json",
            CodecError::NotAnObject => "not_an_object",
            CodecError::InvalidVersion(_) => "invalid_version",
            CodecError::Io(_) => "io",
        }
    }

    /// The peer closed its end of the stream.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            CodecError::Io(e) if matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset
            )
        )
    }
}

impl From<std::io::Error> for CodecError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => CodecError::UnexpectedEof { context: "body" },
            _ => CodecError::Io(err),
        }
    }
}

/// Structural classification of a JSON-RPC envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Has both `method` and `id`.
    Request,
    /// Has `method` and no `id`.
    Notification,
    /// Has `id` and either `result` or `error`.
    Response,
    /// None of the above; forwarded as-is.
    Unknown,
}

/// One JSON-RPC message as it travels through the wrapper.
///
/// `raw` is kept alongside the parsed value so untouched messages are
/// forwarded byte-for-byte.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    raw: Vec<u8>,
    value: Map<String, Value>,
    correlated_request: Option<Map<String, Value>>,
}

impl Message {
    /// Parse a message body received from the wire.
    pub fn from_bytes(raw: Vec<u8>) -> Result<Self, CodecError> {
        let value = match serde_json::from_slice::<Value>(&raw)? {
            Value::Object(map) => map,
            _ => return Err(CodecError::NotAnObject),
        };
        check_version(&value)?;
        Ok(Self {
            raw,
            value,
            correlated_request: None,
        })
    }

    /// Build a message from a JSON object, serializing it for the wire.
    pub fn from_value(value: Map<String, Value>) -> Result<Self, CodecError> {
        check_version(&value)?;
        let raw = serde_json::to_vec(&value)?;
        Ok(Self {
            raw,
            value,
            correlated_request: None,
        })
    }

    /// The exact payload bytes that will be written after the header.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn value(&self) -> &Map<String, Value> {
        &self.value
    }

    pub fn into_value(self) -> Map<String, Value> {
        self.value
    }

    /// The request this response answers, once the correlation tracker has
    /// matched it.
    pub fn correlated_request(&self) -> Option<&Map<String, Value>> {
        self.correlated_request.as_ref()
    }

    pub(crate) fn set_correlated_request(&mut self, request: Map<String, Value>) {
        self.correlated_request = Some(request);
    }

    pub fn kind(&self) -> MessageKind {
        let has_method = self.value.contains_key("method");
        let has_id = self.value.contains_key("id");
        if has_method && has_id {
            MessageKind::Request
        } else if has_method {
            MessageKind::Notification
        } else if has_id
            && (self.value.contains_key("result") || self.value.contains_key("error"))
        {
            MessageKind::Response
        } else {
            MessageKind::Unknown
        }
    }

    pub fn is_request(&self) -> bool {
        self.kind() == MessageKind::Request
    }

    pub fn is_notification(&self) -> bool {
        self.kind() == MessageKind::Notification
    }

    pub fn is_response(&self) -> bool {
        self.kind() == MessageKind::Response
    }

    pub fn id(&self) -> Option<&Value> {
        self.value.get("id")
    }

    pub fn method(&self) -> Option<&str> {
        self.value.get("method").and_then(Value::as_str)
    }
}

fn check_version(value: &Map<String, Value>) -> Result<(), CodecError> {
    match value.get("jsonrpc") {
        Some(Value::String(v)) if v == JSONRPC_VERSION => Ok(()),
        Some(other) => Err(CodecError::InvalidVersion(other.to_string())),
        None => Err(CodecError::InvalidVersion("<missing>".to_string())),
    }
}

/// Read one Content-Length framed message from the stream.
///
/// # Protocol
///
/// 1. Read headers until an empty line (handles both CRLF and LF)
/// 2. Extract the Content-Length header (case-insensitive)
/// 3. Read exactly that many bytes for the body
/// 4. Parse the body as a JSON-RPC 2.0 object
///
/// Returns `Ok(None)` when the stream ends cleanly before the first header
/// byte of a message. Any other truncation or malformed input is an error.
pub async fn read_message<R>(
    reader: &mut R,
    max_size: usize,
) -> Result<Option<Message>, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut saw_header_bytes = false;
    let mut line = Vec::new();

    loop {
        line.clear();
        let bytes_read = (&mut *reader)
            .take(MAX_HEADER_LINE_LEN as u64)
            .read_until(b'\n', &mut line)
            .await?;
        if bytes_read == MAX_HEADER_LINE_LEN && !line.ends_with(b"\n") {
            return Err(CodecError::InvalidHeader(format!(
                "header line exceeds {MAX_HEADER_LINE_LEN} bytes"
            )));
        }

        if bytes_read == 0 {
            if saw_header_bytes {
                return Err(CodecError::UnexpectedEof { context: "headers" });
            }
            return Ok(None);
        }
        saw_header_bytes = true;

        let text = std::str::from_utf8(&line)
            .map_err(|_| CodecError::InvalidHeader(String::from_utf8_lossy(&line).into_owned()))?;
        let trimmed = text.trim_end_matches(['\r', '\n']);

        // Empty line signals end of headers
        if trimmed.is_empty() {
            break;
        }

        let (key, value) = trimmed
            .split_once(':')
            .ok_or_else(|| CodecError::InvalidHeader(trimmed.to_string()))?;
        if key.trim().eq_ignore_ascii_case("Content-Length") {
            let value = value.trim();
            content_length = Some(
                value
                    .parse()
                    .map_err(|_| CodecError::InvalidContentLength(value.to_string()))?,
            );
        }
        // Ignore other headers (e.g., Content-Type)
    }

    let size = content_length.ok_or(CodecError::MissingContentLength)?;
    if size > max_size {
        return Err(CodecError::MessageTooLarge {
            size,
            max: max_size,
        });
    }

    let mut body = vec![0u8; size];
    reader.read_exact(&mut body).await?;

    Message::from_bytes(body).map(Some)
}

/// Write a Content-Length framed message to the stream and flush it.
///
/// The length is the byte length of the payload, never its character count.
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let body = msg.raw();
    let header = format!("Content-Length: {}\r\n\r\n", body.len());

    writer
        .write_all(header.as_bytes())
        .await
        .map_err(CodecError::Io)?;
    writer.write_all(body).await.map_err(CodecError::Io)?;
    writer.flush().await.map_err(CodecError::Io)?;

    Ok(())
}
