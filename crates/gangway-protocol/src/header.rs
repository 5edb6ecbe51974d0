//! The per-call envelope and its codec.

use std::fmt;
use std::io::Read;

use crate::errors::WireError;
use crate::read::{decimal_field, expect_byte, read_until, utf8_field};

/// Upper bound on the call-type token.
const MAX_TYPE_LEN: usize = 16;
/// Upper bound on the routing name.
const MAX_NAME_LEN: usize = 256;
/// Upper bound on the session id.
const MAX_SESSION_LEN: usize = 128;
/// Upper bound on the decimal length field.
const MAX_LENGTH_DIGITS: usize = 19;

/// Largest payload a single call may declare.
///
/// Typed accessors buffer the whole payload in memory, so the declared
/// length is capped rather than trusted blindly.
pub const MAX_CONTENT_LENGTH: u64 = 64 * 1024 * 1024;

/// The closed set of call types a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallType {
    /// Connection handshake; payload is a JSON object of client variables.
    Open,
    /// Legacy form-encoded arguments (`key=value&...`).
    Data,
    /// UTF-8 text payload.
    Text,
    /// Structured JSON payload.
    Json,
    /// Opaque binary payload streamed to the command.
    Binary,
    /// Loop-termination sentinel; carries no payload and never reaches a
    /// command.
    Close,
}

impl CallType {
    /// Parses a wire token case-insensitively.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "open" => Some(Self::Open),
            "data" => Some(Self::Data),
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            "binary" => Some(Self::Binary),
            "close" => Some(Self::Close),
            _ => None,
        }
    }

    /// Canonical wire token.
    #[must_use]
    pub fn as_token(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Data => "data",
            Self::Text => "text",
            Self::Json => "json",
            Self::Binary => "binary",
            Self::Close => "close",
        }
    }

    /// Whether calls of this type are dispatched to a command.
    ///
    /// `open` is consumed by the handshake and `close` terminates the loop;
    /// everything else resolves a routing name.
    #[must_use]
    pub fn is_dispatched(&self) -> bool {
        !matches!(self, Self::Open | Self::Close)
    }
}

impl fmt::Display for CallType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_token())
    }
}

/// Immutable per-call envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    call_type: CallType,
    routing_name: String,
    session_id: String,
    content_length: u64,
}

impl Header {
    /// Builds a header; used by clients and tests composing calls.
    #[must_use]
    pub fn new(
        call_type: CallType,
        routing_name: impl Into<String>,
        session_id: impl Into<String>,
        content_length: u64,
    ) -> Self {
        Self {
            call_type,
            routing_name: routing_name.into(),
            session_id: session_id.into(),
            content_length,
        }
    }

    /// Reads and validates one envelope from the stream.
    ///
    /// After this returns, the next byte on the stream is the first payload
    /// byte.
    ///
    /// # Errors
    ///
    /// [`WireError::Framing`] on a malformed envelope, an unknown call
    /// type, an over-limit field, or a `close` declaring a payload;
    /// [`WireError::ConnectionLost`] when the stream ends mid-envelope.
    pub fn read_from<R: Read + ?Sized>(stream: &mut R) -> Result<Self, WireError> {
        let token = utf8_field(
            read_until(stream, b':', MAX_TYPE_LEN, "call type")?,
            "call type",
        )?;
        expect_byte(stream, b'/')?;
        expect_byte(stream, b'/')?;
        let routing_name = utf8_field(
            read_until(stream, b'/', MAX_NAME_LEN, "routing name")?,
            "routing name",
        )?;
        let session_id = utf8_field(
            read_until(stream, b'/', MAX_SESSION_LEN, "session id")?,
            "session id",
        )?;
        expect_byte(stream, b'(')?;
        let digits = read_until(stream, b')', MAX_LENGTH_DIGITS, "content length")?;
        expect_byte(stream, b'?')?;

        let call_type = CallType::from_token(&token)
            .ok_or_else(|| WireError::framing(format!("unknown call type '{token}'")))?;
        let content_length = decimal_field(&digits, "content length")?;
        if content_length > MAX_CONTENT_LENGTH {
            return Err(WireError::framing(format!(
                "content length {content_length} exceeds {MAX_CONTENT_LENGTH}"
            )));
        }
        if call_type == CallType::Close && content_length != 0 {
            return Err(WireError::framing("close call declares a payload"));
        }

        Ok(Self {
            call_type,
            routing_name,
            session_id,
            content_length,
        })
    }

    /// Serialises the envelope for the wire; the payload follows verbatim.
    #[must_use]
    pub fn wire_format(&self) -> String {
        format!(
            "{}://{}/{}/({})?",
            self.call_type.as_token(),
            self.routing_name,
            self.session_id,
            self.content_length
        )
    }

    /// The call type.
    #[must_use]
    pub fn call_type(&self) -> CallType {
        self.call_type
    }

    /// Routing name as sent by the client, before alias expansion.
    #[must_use]
    pub fn routing_name(&self) -> &str {
        &self.routing_name
    }

    /// Session id; empty on a first `open`.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Declared payload size in bytes.
    #[must_use]
    pub fn content_length(&self) -> u64 {
        self.content_length
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use rstest::rstest;

    use super::*;

    fn parse(input: &str) -> Result<Header, WireError> {
        Header::read_from(&mut Cursor::new(input.as_bytes().to_vec()))
    }

    #[test]
    fn parses_text_call_envelope() {
        let header = parse("text://gangway.echo/12345/(5)?hello").expect("parse");
        assert_eq!(header.call_type(), CallType::Text);
        assert_eq!(header.routing_name(), "gangway.echo");
        assert_eq!(header.session_id(), "12345");
        assert_eq!(header.content_length(), 5);
    }

    #[test]
    fn parses_open_with_empty_fields() {
        let header = parse("open:////(2)?{}").expect("parse");
        assert_eq!(header.call_type(), CallType::Open);
        assert_eq!(header.routing_name(), "");
        assert_eq!(header.session_id(), "");
    }

    #[test]
    fn parsing_stops_at_payload_boundary() {
        let mut cursor = Cursor::new(b"json://a/b/(2)?{}trailing".to_vec());
        let header = Header::read_from(&mut cursor).expect("parse");
        assert_eq!(header.content_length(), 2);
        assert_eq!(cursor.position(), 15);
    }

    #[rstest]
    #[case::unknown_type("bogus://a/b/(0)?")]
    #[case::bad_separator("text:/a/b/(0)?")]
    #[case::missing_paren("text://a/b/0)?")]
    #[case::empty_length("text://a/b/()?")]
    #[case::non_digit_length("text://a/b/(12x)?")]
    #[case::close_with_payload("close:///9/(3)?abc")]
    fn rejects_malformed_envelopes(#[case] input: &str) {
        assert!(matches!(parse(input), Err(WireError::Framing { .. })));
    }

    #[test]
    fn truncated_envelope_is_connection_lost() {
        assert!(matches!(
            parse("text://gangway.ec"),
            Err(WireError::ConnectionLost { .. })
        ));
    }

    #[test]
    fn rejects_oversized_routing_name() {
        let input = format!("text://{}/s/(0)?", "n".repeat(300));
        assert!(matches!(parse(&input), Err(WireError::Framing { .. })));
    }

    #[test]
    fn rejects_excessive_content_length() {
        let input = format!("binary://a/b/({})?", MAX_CONTENT_LENGTH + 1);
        assert!(matches!(parse(&input), Err(WireError::Framing { .. })));
    }

    #[test]
    fn wire_format_round_trips() {
        let header = Header::new(CallType::Json, "gangway.session.set", "42", 17);
        let parsed = parse(&header.wire_format()).expect("parse");
        assert_eq!(parsed, header);
    }
}
