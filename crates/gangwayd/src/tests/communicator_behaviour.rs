//! Protocol state machine behaviour over in-memory connections.

use std::sync::{Arc, Mutex};

use serde_json::json;

use gangway_protocol::{Call, CallType, Content, ContentKind, WireError};

use crate::communicator::{Communicator, ConnectionError};
use crate::context::{BridgeRequest, CallContext, ConnectionHook, CURRENT_CALL};
use crate::dispatch::{Command, CommandError};

use super::support::{
    ScriptedStream, parse_responses, session_id_from_ack, test_communicator, wire_call,
    wire_close, wire_open,
};

/// A command that deliberately never touches its payload.
struct IgnorePayloadCommand;

impl Command for IgnorePayloadCommand {
    fn execute(
        &self,
        _call: &mut Call<'_>,
        _ctx: &mut CallContext<'_>,
    ) -> Result<Content, CommandError> {
        Ok(Content::text("ignored"))
    }
}

/// A command that always fails.
struct FailingCommand;

impl Command for FailingCommand {
    fn execute(
        &self,
        _call: &mut Call<'_>,
        _ctx: &mut CallContext<'_>,
    ) -> Result<Content, CommandError> {
        Err(CommandError::new("deliberate failure"))
    }
}

/// A command that streams its binary payload and reports the byte count.
struct CountBytesCommand;

impl Command for CountBytesCommand {
    fn execute(
        &self,
        call: &mut Call<'_>,
        _ctx: &mut CallContext<'_>,
    ) -> Result<Content, CommandError> {
        let mut buf = [0_u8; 7];
        let mut total: u64 = 0;
        while call.remaining() > 0 {
            total += call.read(&mut buf).map_err(CallErrorShim)? as u64;
        }
        Ok(Content::text(total.to_string()))
    }
}

/// Adapts a wire error into a command failure for the streaming test.
struct CallErrorShim(WireError);

impl From<CallErrorShim> for CommandError {
    fn from(shim: CallErrorShim) -> Self {
        CommandError::with_source("payload read failed", shim.0)
    }
}

/// A command that reads the call descriptor seeded into the call scope.
struct DescribeCallCommand;

impl Command for DescribeCallCommand {
    fn execute(
        &self,
        _call: &mut Call<'_>,
        ctx: &mut CallContext<'_>,
    ) -> Result<Content, CommandError> {
        let descriptor = ctx
            .call
            .get(CURRENT_CALL)
            .map_err(CommandError::from)?
            .ok_or_else(|| CommandError::new("descriptor not seeded"))?;
        Ok(Content::text(format!(
            "{}:{}",
            descriptor.routing_name, descriptor.call_type
        )))
    }
}

fn run(communicator: &Communicator, tape: Vec<u8>) -> (Result<(), ConnectionError>, Vec<u8>) {
    let mut stream = ScriptedStream::new(tape);
    let result = communicator.communicate(&mut stream);
    (result, stream.output)
}

#[test]
fn open_calls_close_produces_one_response_per_call() {
    let communicator = test_communicator(|_, _| {});
    let mut tape = Vec::new();
    wire_open(&mut tape, "", b"{}");
    wire_call(&mut tape, CallType::Text, "gangway.echo", "", b"hello");
    wire_call(&mut tape, CallType::Text, "@echo", "", b"again");
    wire_close(&mut tape, "");

    let (result, output) = run(&communicator, tape);

    result.expect("clean close");
    let responses = parse_responses(&output);
    assert_eq!(responses.len(), 3);
    assert_eq!(responses[0].0, Some(ContentKind::Json));
    assert_eq!(responses[1], (Some(ContentKind::Text), b"hello".to_vec()));
    assert_eq!(responses[2], (Some(ContentKind::Text), b"again".to_vec()));
}

#[test]
fn non_open_first_call_is_rejected_without_a_session() {
    let communicator = test_communicator(|_, _| {});
    let mut tape = Vec::new();
    wire_call(&mut tape, CallType::Text, "gangway.echo", "", b"hello");

    let (result, output) = run(&communicator, tape);

    assert!(matches!(
        result,
        Err(ConnectionError::Wire(WireError::Violation { .. }))
    ));
    assert!(output.is_empty(), "no response before a valid handshake");
    assert!(communicator.sessions().is_empty(), "no session was created");
}

#[test]
fn unknown_routing_name_keeps_the_connection_alive() {
    let communicator = test_communicator(|_, _| {});
    let mut tape = Vec::new();
    wire_open(&mut tape, "", b"{}");
    wire_call(&mut tape, CallType::Text, "missing", "", b"dropped");
    wire_call(&mut tape, CallType::Text, "gangway.echo", "", b"still here");
    wire_close(&mut tape, "");

    let (result, output) = run(&communicator, tape);

    result.expect("clean close");
    let responses = parse_responses(&output);
    assert_eq!(responses.len(), 3);
    assert_eq!(responses[1].0, Some(ContentKind::Error));
    let error_body = String::from_utf8_lossy(&responses[1].1);
    assert!(error_body.contains("no command bound"), "{error_body}");
    assert_eq!(responses[2], (Some(ContentKind::Text), b"still here".to_vec()));
}

#[test]
fn unread_payloads_never_desynchronise_the_stream() {
    let communicator = test_communicator(|registry, _| {
        registry
            .register("test.ignore", Arc::new(IgnorePayloadCommand))
            .expect("unique name");
    });
    let mut tape = Vec::new();
    wire_open(&mut tape, "", b"{}");
    // The command reads none of these 4096 bytes; discard must skip them.
    wire_call(&mut tape, CallType::Binary, "test.ignore", "", &[0xab; 4096]);
    wire_call(&mut tape, CallType::Text, "gangway.echo", "", b"aligned");
    wire_close(&mut tape, "");

    let (result, output) = run(&communicator, tape);

    result.expect("clean close");
    let responses = parse_responses(&output);
    assert_eq!(responses[1], (Some(ContentKind::Text), b"ignored".to_vec()));
    assert_eq!(responses[2], (Some(ContentKind::Text), b"aligned".to_vec()));
}

#[test]
fn binary_payloads_stream_through_the_bounded_reader() {
    let communicator = test_communicator(|registry, _| {
        registry
            .register("test.count", Arc::new(CountBytesCommand))
            .expect("unique name");
    });
    let mut tape = Vec::new();
    wire_open(&mut tape, "", b"{}");
    wire_call(&mut tape, CallType::Binary, "test.count", "", &[7_u8; 1000]);
    wire_close(&mut tape, "");

    let (result, output) = run(&communicator, tape);

    result.expect("clean close");
    let responses = parse_responses(&output);
    assert_eq!(responses[1], (Some(ContentKind::Text), b"1000".to_vec()));
}

#[test]
fn command_failure_becomes_error_content_and_the_loop_continues() {
    let communicator = test_communicator(|registry, _| {
        registry
            .register("test.fail", Arc::new(FailingCommand))
            .expect("unique name");
    });
    let mut tape = Vec::new();
    wire_open(&mut tape, "", b"{}");
    wire_call(&mut tape, CallType::Text, "test.fail", "", b"");
    wire_call(&mut tape, CallType::Text, "gangway.echo", "", b"recovered");
    wire_close(&mut tape, "");

    let (result, output) = run(&communicator, tape);

    result.expect("clean close");
    let responses = parse_responses(&output);
    assert_eq!(responses[1].0, Some(ContentKind::Error));
    assert!(String::from_utf8_lossy(&responses[1].1).contains("deliberate failure"));
    assert_eq!(responses[2], (Some(ContentKind::Text), b"recovered".to_vec()));
}

#[test]
fn truncated_stream_mid_call_aborts_the_connection() {
    let communicator = test_communicator(|_, _| {});
    let mut tape = Vec::new();
    wire_open(&mut tape, "", b"{}");
    // Declare 100 payload bytes but provide only 5, then end the tape.
    let header = gangway_protocol::Header::new(CallType::Text, "gangway.echo", "", 100);
    tape.extend_from_slice(header.wire_format().as_bytes());
    tape.extend_from_slice(b"stub!");

    let (result, _output) = run(&communicator, tape);

    assert!(matches!(
        result,
        Err(ConnectionError::Wire(WireError::ConnectionLost { .. }))
    ));
}

#[test]
fn call_descriptor_is_seeded_into_the_call_scope() {
    let communicator = test_communicator(|registry, _| {
        registry
            .register("test.describe", Arc::new(DescribeCallCommand))
            .expect("unique name");
    });
    let mut tape = Vec::new();
    wire_open(&mut tape, "", b"{}");
    wire_call(&mut tape, CallType::Json, "test.describe", "", b"{}");
    wire_close(&mut tape, "");

    let (result, output) = run(&communicator, tape);

    result.expect("clean close");
    let responses = parse_responses(&output);
    assert_eq!(
        responses[1],
        (Some(ContentKind::Text), b"test.describe:json".to_vec())
    );
}

#[test]
fn session_state_survives_reconnection_with_the_same_id() {
    let communicator = test_communicator(|_, _| {});

    let mut first = Vec::new();
    wire_open(&mut first, "", b"{}");
    wire_call(
        &mut first,
        CallType::Json,
        "gangway.session.set",
        "",
        json!({"key": "lang", "value": "de"}).to_string().as_bytes(),
    );
    wire_close(&mut first, "");
    let (result, output) = run(&communicator, first);
    result.expect("first connection closes cleanly");
    let responses = parse_responses(&output);
    let session_id = session_id_from_ack(&responses[0].1);

    let mut second = Vec::new();
    wire_open(&mut second, &session_id, b"{}");
    wire_call(
        &mut second,
        CallType::Json,
        "gangway.session.get",
        &session_id,
        json!({"key": "lang"}).to_string().as_bytes(),
    );
    wire_close(&mut second, &session_id);
    let (result, output) = run(&communicator, second);
    result.expect("second connection closes cleanly");
    let responses = parse_responses(&output);

    assert_eq!(session_id_from_ack(&responses[0].1), session_id);
    assert_eq!(responses[1], (Some(ContentKind::Json), b"\"de\"".to_vec()));
}

#[test]
fn connection_hooks_run_before_and_after_the_active_phase() {
    struct RecordingHook {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl ConnectionHook for RecordingHook {
        fn before(&self, request: &BridgeRequest) {
            self.events
                .lock()
                .expect("hook log")
                .push(format!("before:{}", request.client_vars().len()));
        }

        fn after(&self, _request: &BridgeRequest) {
            self.events.lock().expect("hook log").push("after".into());
        }
    }

    let events = Arc::new(Mutex::new(Vec::new()));
    let sessions = Arc::new(crate::session::SessionManager::new());
    let mut registry = crate::dispatch::CommandRegistry::new(Vec::new());
    crate::dispatch::register_builtins(&mut registry, &sessions).expect("builtins");
    let communicator = Communicator::new(
        Arc::new(registry),
        sessions,
        Vec::new(),
        vec![Arc::new(RecordingHook {
            events: Arc::clone(&events),
        })],
    );

    let mut tape = Vec::new();
    wire_open(&mut tape, "", br#"{"REMOTE_ADDR":"10.0.0.1"}"#);
    wire_call(&mut tape, CallType::Text, "gangway.echo", "", b"x");
    wire_close(&mut tape, "");

    let (result, _output) = run(&communicator, tape);
    result.expect("clean close");
    assert_eq!(*events.lock().expect("hook log"), vec!["before:1", "after"]);
}

#[test]
fn hooks_also_run_when_the_connection_fails() {
    struct AfterHook {
        events: Arc<Mutex<Vec<&'static str>>>,
    }

    impl ConnectionHook for AfterHook {
        fn after(&self, _request: &BridgeRequest) {
            self.events.lock().expect("hook log").push("after");
        }
    }

    let events = Arc::new(Mutex::new(Vec::new()));
    let sessions = Arc::new(crate::session::SessionManager::new());
    let registry = crate::dispatch::CommandRegistry::new(Vec::new());
    let communicator = Communicator::new(
        Arc::new(registry),
        sessions,
        Vec::new(),
        vec![Arc::new(AfterHook {
            events: Arc::clone(&events),
        })],
    );

    let mut tape = Vec::new();
    wire_open(&mut tape, "", b"{}");
    // The tape ends mid-conversation: the peer vanished.
    let (result, _output) = run(&communicator, tape);

    assert!(matches!(
        result,
        Err(ConnectionError::Wire(WireError::ConnectionLost { .. }))
    ));
    assert_eq!(*events.lock().expect("hook log"), vec!["after"]);
}
