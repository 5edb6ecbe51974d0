//! Shared helpers for behaviour tests.

use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;

use gangway_config::AliasRule;
use gangway_protocol::{CallType, ContentKind, Header, ResponseHeader};

use crate::communicator::Communicator;
use crate::dispatch::{CommandRegistry, register_builtins};
use crate::session::SessionManager;

/// In-memory connection: a scripted input tape and a captured output tape.
pub(crate) struct ScriptedStream {
    input: Cursor<Vec<u8>>,
    pub(crate) output: Vec<u8>,
}

impl ScriptedStream {
    pub(crate) fn new(input: Vec<u8>) -> Self {
        Self {
            input: Cursor::new(input),
            output: Vec::new(),
        }
    }
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Serialises one call unit onto a byte tape.
pub(crate) fn wire_call(
    tape: &mut Vec<u8>,
    call_type: CallType,
    name: &str,
    session: &str,
    payload: &[u8],
) {
    let header = Header::new(call_type, name, session, payload.len() as u64);
    tape.extend_from_slice(header.wire_format().as_bytes());
    tape.extend_from_slice(payload);
}

pub(crate) fn wire_open(tape: &mut Vec<u8>, session: &str, payload: &[u8]) {
    wire_call(tape, CallType::Open, "", session, payload);
}

pub(crate) fn wire_close(tape: &mut Vec<u8>, session: &str) {
    wire_call(tape, CallType::Close, "", session, b"");
}

/// Parses every response unit on a captured output tape.
pub(crate) fn parse_responses(tape: &[u8]) -> Vec<(Option<ContentKind>, Vec<u8>)> {
    let mut cursor = Cursor::new(tape.to_vec());
    let mut responses = Vec::new();
    while (cursor.position() as usize) < tape.len() {
        let header = ResponseHeader::read_from(&mut cursor).expect("response envelope");
        let body = header.read_body(&mut cursor).expect("response body");
        responses.push((header.kind, body));
    }
    responses
}

/// Reads one response unit from a live stream.
pub(crate) fn read_response(stream: &mut impl Read) -> (Option<ContentKind>, Vec<u8>) {
    let header = ResponseHeader::read_from(stream).expect("response envelope");
    let body = header.read_body(stream).expect("response body");
    (header.kind, body)
}

/// Extracts the session id from an `open` acknowledgement body.
pub(crate) fn session_id_from_ack(body: &[u8]) -> String {
    let ack: serde_json::Value = serde_json::from_slice(body).expect("ack is json");
    ack["session_id"]
        .as_str()
        .expect("ack carries session_id")
        .to_owned()
}

/// A communicator with the built-in command set plus test registrations.
pub(crate) fn test_communicator(
    customise: impl FnOnce(&mut CommandRegistry, &Arc<SessionManager>),
) -> Communicator {
    let sessions = Arc::new(SessionManager::new());
    let mut registry = CommandRegistry::new(vec![AliasRule::new("@", "gangway.")]);
    register_builtins(&mut registry, &sessions).expect("builtins register");
    customise(&mut registry, &sessions);
    Communicator::new(Arc::new(registry), sessions, Vec::new(), Vec::new())
}
