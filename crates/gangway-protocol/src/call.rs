//! One decoded unit of work, bound to a header and a length-gated reader.

use std::collections::HashMap;
use std::io::Read;

use serde_json::Value;
use thiserror::Error;

use crate::errors::WireError;
use crate::header::{CallType, Header};

/// Decoded `data` call arguments.
pub type FormMap = HashMap<String, String>;

/// Recoverable, per-call payload failures.
///
/// Unlike [`WireError`], these never require tearing the connection down:
/// the framing stays intact because the bounded reader still knows how many
/// payload bytes remain to discard.
#[derive(Debug, Error)]
pub enum CallError {
    /// The underlying bounded read failed; wraps the fatal wire error.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// The payload could not be decoded into the requested representation.
    #[error("failed to decode {call_type} payload: {message}")]
    Decode {
        /// Call type whose payload was being decoded.
        call_type: CallType,
        /// Decoder diagnostic.
        message: String,
    },

    /// The call's variant does not offer the requested representation.
    #[error("{call_type} call has no {representation} representation")]
    Unsupported {
        /// Call type that was accessed.
        call_type: CallType,
        /// Requested representation.
        representation: &'static str,
    },
}

/// Per-variant decode state.
///
/// Each variant owns its decode-once cache; the variant is chosen exactly
/// once, when the header is bound.
#[derive(Debug)]
enum DecodeState {
    /// `text` calls cache the UTF-8 payload.
    Text { text: Option<String> },
    /// `json` (and `open`) calls cache both the raw text and the parsed value.
    Json {
        text: Option<String>,
        value: Option<Value>,
    },
    /// `data` calls cache the decoded form map.
    Data { form: Option<FormMap> },
    /// `binary` calls stream; nothing to cache.
    Binary,
}

/// A call bound to its header and the connection's input stream.
///
/// All payload access flows through [`Call::read`], which never yields more
/// than `content_length` bytes in total. Typed accessors buffer the
/// remaining payload on first use and return the cached value afterwards.
pub struct Call<'a> {
    header: Header,
    stream: &'a mut (dyn Read + Send),
    consumed: u64,
    state: DecodeState,
}

impl std::fmt::Debug for Call<'_> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Call")
            .field("header", &self.header)
            .field("consumed", &self.consumed)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<'a> Call<'a> {
    /// Binds a header to the connection's input stream.
    ///
    /// # Errors
    ///
    /// [`WireError::Violation`] for `close` headers: the sentinel carries no
    /// payload and must never be materialised as a call.
    pub fn bind(header: Header, stream: &'a mut (dyn Read + Send)) -> Result<Self, WireError> {
        let state = match header.call_type() {
            CallType::Close => {
                return Err(WireError::violation("close is a sentinel, not a call"));
            }
            CallType::Text => DecodeState::Text { text: None },
            CallType::Open | CallType::Json => DecodeState::Json {
                text: None,
                value: None,
            },
            CallType::Data => DecodeState::Data { form: None },
            CallType::Binary => DecodeState::Binary,
        };
        Ok(Self {
            header,
            stream,
            consumed: 0,
            state,
        })
    }

    /// The bound envelope.
    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The call's type.
    #[must_use]
    pub fn call_type(&self) -> CallType {
        self.header.call_type()
    }

    /// Total payload bytes consumed so far.
    #[must_use]
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Payload bytes still available.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.header.content_length() - self.consumed
    }

    /// Reads up to `buf.len()` payload bytes, bounded by the declared
    /// content length.
    ///
    /// # Errors
    ///
    /// [`WireError::ConnectionLost`] when the payload is already fully
    /// consumed, the stream ends early, or the transport fails.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, WireError> {
        if self.remaining() == 0 {
            return Err(WireError::lost("read past declared content length"));
        }
        let cap = usize::try_from(self.remaining())
            .unwrap_or(usize::MAX)
            .min(buf.len());
        if cap == 0 {
            return Ok(0);
        }
        let read = match self.stream.read(&mut buf[..cap]) {
            Ok(0) => return Err(WireError::lost("end of stream inside payload")),
            Ok(read) => read,
            Err(error) => return Err(WireError::lost_io("transport error inside payload", error)),
        };
        self.consumed += read as u64;
        Ok(read)
    }

    /// Consumes and drops any unread payload bytes.
    ///
    /// The communicator calls this unconditionally after a command returns,
    /// so the next envelope always starts at the correct offset no matter
    /// how much of the payload the command actually read.
    ///
    /// # Errors
    ///
    /// [`WireError::ConnectionLost`] when the stream ends before the
    /// declared length is reached.
    pub fn discard(&mut self) -> Result<(), WireError> {
        let mut scratch = [0_u8; 4096];
        while self.remaining() > 0 {
            self.read(&mut scratch)?;
        }
        Ok(())
    }

    /// The payload as UTF-8 text, decoded once and cached.
    ///
    /// # Errors
    ///
    /// [`CallError::Unsupported`] for `data` and `binary` calls,
    /// [`CallError::Decode`] on invalid UTF-8, or a wrapped [`WireError`]
    /// when the bounded read fails.
    pub fn text(&mut self) -> Result<&str, CallError> {
        let call_type = self.call_type();
        if matches!(self.state, DecodeState::Data { .. } | DecodeState::Binary) {
            return Err(CallError::Unsupported {
                call_type,
                representation: "text",
            });
        }
        if matches!(
            self.state,
            DecodeState::Text { text: None } | DecodeState::Json { text: None, .. }
        ) {
            let bytes = drain(&mut *self.stream, &mut self.consumed, &self.header)?;
            let decoded = String::from_utf8(bytes).map_err(|_| CallError::Decode {
                call_type,
                message: "payload is not valid UTF-8".into(),
            })?;
            match self.state {
                DecodeState::Text { ref mut text } | DecodeState::Json { ref mut text, .. } => {
                    *text = Some(decoded);
                }
                _ => {}
            }
        }
        match self.state {
            DecodeState::Text { ref text } | DecodeState::Json { ref text, .. } => {
                Ok(text.as_deref().unwrap_or(""))
            }
            _ => Ok(""),
        }
    }

    /// The payload as a parsed JSON value, decoded once and cached.
    ///
    /// Available for `json` calls and the `open` handshake.
    ///
    /// # Errors
    ///
    /// [`CallError::Unsupported`] for other variants, [`CallError::Decode`]
    /// on malformed JSON, or a wrapped [`WireError`] when the bounded read
    /// fails.
    pub fn json(&mut self) -> Result<&Value, CallError> {
        let call_type = self.call_type();
        if !matches!(self.state, DecodeState::Json { .. }) {
            return Err(CallError::Unsupported {
                call_type,
                representation: "json",
            });
        }
        if matches!(self.state, DecodeState::Json { value: None, .. }) {
            let text = self.text()?.to_owned();
            let parsed: Value =
                serde_json::from_str(&text).map_err(|error| CallError::Decode {
                    call_type,
                    message: error.to_string(),
                })?;
            if let DecodeState::Json { ref mut value, .. } = self.state {
                *value = Some(parsed);
            }
        }
        match self.state {
            DecodeState::Json {
                value: Some(ref value),
                ..
            } => Ok(value),
            _ => Err(CallError::Decode {
                call_type,
                message: "json cache unexpectedly empty".into(),
            }),
        }
    }

    /// The payload as decoded form arguments, decoded once and cached.
    ///
    /// # Errors
    ///
    /// [`CallError::Unsupported`] for non-`data` calls, [`CallError::Decode`]
    /// on malformed form encoding, or a wrapped [`WireError`] when the
    /// bounded read fails.
    pub fn form(&mut self) -> Result<&FormMap, CallError> {
        let call_type = self.call_type();
        if !matches!(self.state, DecodeState::Data { .. }) {
            return Err(CallError::Unsupported {
                call_type,
                representation: "form",
            });
        }
        if matches!(self.state, DecodeState::Data { form: None }) {
            let bytes = drain(&mut *self.stream, &mut self.consumed, &self.header)?;
            let raw = String::from_utf8(bytes).map_err(|_| CallError::Decode {
                call_type,
                message: "payload is not valid UTF-8".into(),
            })?;
            let parsed = parse_form(&raw).map_err(|message| CallError::Decode {
                call_type,
                message,
            })?;
            if let DecodeState::Data { ref mut form } = self.state {
                *form = Some(parsed);
            }
        }
        match self.state {
            DecodeState::Data {
                form: Some(ref form),
            } => Ok(form),
            _ => Err(CallError::Decode {
                call_type,
                message: "form cache unexpectedly empty".into(),
            }),
        }
    }
}

/// Reads every remaining payload byte into memory.
fn drain(
    stream: &mut (dyn Read + Send),
    consumed: &mut u64,
    header: &Header,
) -> Result<Vec<u8>, WireError> {
    let remaining = header.content_length() - *consumed;
    let mut bytes = Vec::with_capacity(usize::try_from(remaining).unwrap_or(0));
    let mut chunk = [0_u8; 4096];
    while *consumed < header.content_length() {
        let outstanding = header.content_length() - *consumed;
        let cap = usize::try_from(outstanding)
            .unwrap_or(usize::MAX)
            .min(chunk.len());
        let read = match stream.read(&mut chunk[..cap]) {
            Ok(0) => return Err(WireError::lost("end of stream inside payload")),
            Ok(read) => read,
            Err(error) => return Err(WireError::lost_io("transport error inside payload", error)),
        };
        *consumed += read as u64;
        bytes.extend_from_slice(&chunk[..read]);
    }
    Ok(bytes)
}

/// Decodes `key=value&key=value` form arguments with percent escapes.
fn parse_form(raw: &str) -> Result<FormMap, String> {
    let mut map = FormMap::new();
    for pair in raw.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = percent_decode(key).ok_or_else(|| format!("malformed escape in key '{key}'"))?;
        let value =
            percent_decode(value).ok_or_else(|| format!("malformed escape in value '{value}'"))?;
        map.insert(key, value);
    }
    Ok(map)
}

/// Decodes `%XX` escapes and `+` spaces; `None` on a malformed escape.
fn percent_decode(encoded: &str) -> Option<String> {
    let mut decoded = Vec::with_capacity(encoded.len());
    let mut bytes = encoded.bytes();
    while let Some(byte) = bytes.next() {
        match byte {
            b'%' => {
                let high = hex_value(bytes.next()?)?;
                let low = hex_value(bytes.next()?)?;
                decoded.push(high << 4 | low);
            }
            b'+' => decoded.push(b' '),
            other => decoded.push(other),
        }
    }
    String::from_utf8(decoded).ok()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
