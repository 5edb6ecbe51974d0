//! Response content and its envelope.

use std::io::{Read, Write};

use serde_json::Value;

use crate::errors::WireError;
use crate::read::{decimal_field, expect_byte, read_until, utf8_field};

/// Upper bound on the MIME token of a response envelope.
const MAX_MIME_LEN: usize = 64;
/// Upper bound on the decimal length field of a response envelope.
const MAX_LENGTH_DIGITS: usize = 19;

/// Payload classification carried in the response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// Plain UTF-8 text.
    Text,
    /// Serialised JSON.
    Json,
    /// Opaque bytes.
    Binary,
    /// A failure description; the call did not produce a result.
    Error,
}

impl ContentKind {
    /// The MIME token written to the wire.
    #[must_use]
    pub fn mime(&self) -> &'static str {
        match self {
            Self::Text => "text/plain",
            Self::Json => "application/json",
            Self::Binary => "application/octet-stream",
            Self::Error => "application/error",
        }
    }

    /// Maps a wire MIME token back to a kind.
    #[must_use]
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "text/plain" => Some(Self::Text),
            "application/json" => Some(Self::Json),
            "application/octet-stream" => Some(Self::Binary),
            "application/error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// The result of one dispatched call.
///
/// Exactly one `Content` is produced per non-terminal call: either a
/// success payload or an error description the client can surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    kind: ContentKind,
    body: Vec<u8>,
}

impl Content {
    /// Text content.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            kind: ContentKind::Text,
            body: body.into().into_bytes(),
        }
    }

    /// JSON content serialised from a value.
    #[must_use]
    pub fn json(value: &Value) -> Self {
        Self {
            kind: ContentKind::Json,
            body: value.to_string().into_bytes(),
        }
    }

    /// Binary content.
    #[must_use]
    pub fn binary(body: Vec<u8>) -> Self {
        Self {
            kind: ContentKind::Binary,
            body,
        }
    }

    /// Error content wrapping a failure description.
    pub fn error(failure: impl std::fmt::Display) -> Self {
        Self {
            kind: ContentKind::Error,
            body: failure.to_string().into_bytes(),
        }
    }

    /// The payload classification.
    #[must_use]
    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    /// Whether this content is an error description.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.kind == ContentKind::Error
    }

    /// Whether any payload bytes follow the envelope.
    #[must_use]
    pub fn has_payload(&self) -> bool {
        !self.body.is_empty()
    }

    /// The raw payload bytes.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Serialises envelope and payload to the output stream and flushes.
    ///
    /// # Errors
    ///
    /// Propagates the transport error when the write or flush fails.
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<(), WireError> {
        let envelope = format!("{}://({})?", self.kind.mime(), self.body.len());
        out.write_all(envelope.as_bytes())?;
        out.write_all(&self.body)?;
        out.flush()?;
        Ok(())
    }
}

/// Parsed response envelope, used by clients reading what the daemon wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Payload classification; `None` when the MIME token is unknown.
    pub kind: Option<ContentKind>,
    /// Raw MIME token from the wire.
    pub mime: String,
    /// Payload length in bytes.
    pub length: u64,
}

impl ResponseHeader {
    /// Reads one response envelope; the payload follows verbatim.
    ///
    /// # Errors
    ///
    /// [`WireError::Framing`] on a malformed envelope and
    /// [`WireError::ConnectionLost`] when the stream ends early.
    pub fn read_from<R: Read + ?Sized>(stream: &mut R) -> Result<Self, WireError> {
        let mime = utf8_field(read_until(stream, b':', MAX_MIME_LEN, "mime")?, "mime")?;
        expect_byte(stream, b'/')?;
        expect_byte(stream, b'/')?;
        expect_byte(stream, b'(')?;
        let digits = read_until(stream, b')', MAX_LENGTH_DIGITS, "length")?;
        expect_byte(stream, b'?')?;
        let length = decimal_field(&digits, "length")?;
        Ok(Self {
            kind: ContentKind::from_mime(&mime),
            mime,
            length,
        })
    }

    /// Reads the payload that follows this envelope.
    ///
    /// # Errors
    ///
    /// [`WireError::ConnectionLost`] when the stream ends before `length`
    /// bytes arrive.
    pub fn read_body<R: Read + ?Sized>(&self, stream: &mut R) -> Result<Vec<u8>, WireError> {
        let mut body = vec![0_u8; usize::try_from(self.length).unwrap_or(0)];
        stream.read_exact(&mut body).map_err(|error| {
            if error.kind() == std::io::ErrorKind::UnexpectedEof {
                WireError::lost("end of stream inside response body")
            } else {
                WireError::lost_io("transport error inside response body", error)
            }
        })?;
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn writes_text_envelope_and_body() {
        let mut out = Vec::new();
        Content::text("hello").write_to(&mut out).expect("write");
        assert_eq!(out, b"text/plain://(5)?hello");
    }

    #[test]
    fn writes_empty_json_object() {
        let mut out = Vec::new();
        Content::json(&serde_json::json!({}))
            .write_to(&mut out)
            .expect("write");
        assert_eq!(out, b"application/json://(2)?{}");
    }

    #[test]
    fn error_content_carries_description() {
        let content = Content::error("command not found: missing");
        assert!(content.is_error());
        assert_eq!(content.body(), b"command not found: missing");
    }

    #[test]
    fn response_round_trips() {
        let mut wire = Vec::new();
        Content::text("payload").write_to(&mut wire).expect("write");

        let mut cursor = Cursor::new(wire);
        let header = ResponseHeader::read_from(&mut cursor).expect("read envelope");
        assert_eq!(header.kind, Some(ContentKind::Text));
        assert_eq!(header.length, 7);
        let body = header.read_body(&mut cursor).expect("read body");
        assert_eq!(body, b"payload");
    }

    #[test]
    fn unknown_mime_is_preserved() {
        let mut cursor = Cursor::new(b"application/x-custom://(0)?".to_vec());
        let header = ResponseHeader::read_from(&mut cursor).expect("read envelope");
        assert_eq!(header.kind, None);
        assert_eq!(header.mime, "application/x-custom");
    }

    #[test]
    fn truncated_body_is_connection_lost() {
        let mut cursor = Cursor::new(b"text/plain://(10)?abc".to_vec());
        let header = ResponseHeader::read_from(&mut cursor).expect("read envelope");
        assert!(matches!(
            header.read_body(&mut cursor),
            Err(WireError::ConnectionLost { .. })
        ));
    }
}
