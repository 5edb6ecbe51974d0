//! The per-connection protocol state machine.
//!
//! A connection moves through three states: awaiting-open, active, closed.
//! The first envelope must be an `open` handshake; the active phase loops
//! over strictly alternating call/response pairs until a `close` sentinel
//! or a fatal error; teardown runs the after-request hooks and exits the
//! request scope on both the graceful and the failure path.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;

use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use gangway_protocol::{Call, CallType, Content, Header, WireError};

use crate::context::{
    BridgeRequest, CLIENT_VARS, CURRENT_CALL, CURRENT_SESSION, CallContext, CallDescriptor,
    ConnectionHook,
};
use crate::dispatch::{CallFilter, CommandRegistry, FilterChain};
use crate::scope::{ScopeContext, ScopeError};
use crate::session::SessionManager;

const COMMUNICATOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::communicator");

/// Connection-fatal failures raised while driving a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The wire protocol broke: framing, transport, or state violations.
    #[error(transparent)]
    Wire(#[from] WireError),
    /// A scope was misused; a programming error surfaced at runtime.
    #[error(transparent)]
    Scope(#[from] ScopeError),
}

/// Drives connections through the bridge protocol.
///
/// One communicator serves every connection; all per-connection state
/// lives on the worker's stack.
pub struct Communicator {
    registry: Arc<CommandRegistry>,
    sessions: Arc<SessionManager>,
    filters: Arc<[Arc<dyn CallFilter>]>,
    hooks: Arc<[Arc<dyn ConnectionHook>]>,
}

impl Communicator {
    /// Assembles a communicator from its collaborators.
    #[must_use]
    pub fn new(
        registry: Arc<CommandRegistry>,
        sessions: Arc<SessionManager>,
        filters: Vec<Arc<dyn CallFilter>>,
        hooks: Vec<Arc<dyn ConnectionHook>>,
    ) -> Self {
        Self {
            registry,
            sessions,
            filters: filters.into(),
            hooks: hooks.into(),
        }
    }

    /// The session manager connections bind against.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Runs one connection from handshake to teardown.
    ///
    /// Recoverable per-call failures are answered with error content and
    /// never surface here; an `Err` means the connection died abnormally
    /// and is reported as an anomaly by the caller.
    ///
    /// # Errors
    ///
    /// [`ConnectionError`] on framing violations, transport failures, a
    /// non-`open` first call, or scope misuse.
    pub fn communicate<S>(&self, stream: &mut S) -> Result<(), ConnectionError>
    where
        S: Read + Write + Send,
    {
        let request = self.open_handshake(stream)?;
        for hook in self.hooks.iter() {
            hook.before(&request);
        }

        let mut request_scope = ScopeContext::new("request");
        let mut call_scope = ScopeContext::new("call");
        request_scope.enter()?;

        let outcome = self.active_phase(stream, &request, &mut request_scope, &mut call_scope);

        for hook in self.hooks.iter() {
            hook.after(&request);
        }
        let exited = request_scope.exit();
        let _ = stream.flush();

        outcome?;
        exited?;
        debug!(
            target: COMMUNICATOR_TARGET,
            session = %request.session().id(),
            "connection closed"
        );
        Ok(())
    }

    /// Reads the mandatory `open` envelope and binds a session.
    ///
    /// No session is created or touched before the call type is verified,
    /// so a stray non-`open` first call cannot leave state behind.
    fn open_handshake<S>(&self, stream: &mut S) -> Result<BridgeRequest, ConnectionError>
    where
        S: Read + Write + Send,
    {
        let header = Header::read_from(stream)?;
        if header.call_type() != CallType::Open {
            return Err(WireError::violation(format!(
                "first call must be open, got '{}'",
                header.call_type()
            ))
            .into());
        }

        let presented = header.session_id().to_owned();
        let client_vars = if header.content_length() == 0 {
            HashMap::new()
        } else {
            let mut call = Call::bind(header, stream)?;
            let vars = match call.json() {
                Ok(value) => client_vars_from(value),
                Err(error) => {
                    return Err(WireError::violation(format!(
                        "malformed open handshake: {error}"
                    ))
                    .into());
                }
            };
            call.discard()?;
            vars
        };

        let session = if presented.is_empty() {
            None
        } else {
            self.sessions.get(&presented)
        };
        let session = match session {
            Some(session) => {
                session.touch();
                debug!(
                    target: COMMUNICATOR_TARGET,
                    session = %session.id(),
                    "session resumed"
                );
                session
            }
            None => self.sessions.create(),
        };

        Content::json(&json!({ "session_id": session.id() })).write_to(stream)?;
        Ok(BridgeRequest::new(session, client_vars))
    }

    /// The active call loop: strictly sequential call/response pairs.
    fn active_phase<S>(
        &self,
        stream: &mut S,
        request: &BridgeRequest,
        request_scope: &mut ScopeContext,
        call_scope: &mut ScopeContext,
    ) -> Result<(), ConnectionError>
    where
        S: Read + Write + Send,
    {
        request_scope.seed(CURRENT_SESSION, Arc::clone(request.session()))?;
        request_scope.seed(CLIENT_VARS, request.client_vars().clone())?;

        loop {
            let header = Header::read_from(stream)?;
            if header.call_type() == CallType::Close {
                return Ok(());
            }
            request.session().touch();
            let content = self.dispatch_call(header, stream, request_scope, call_scope)?;
            content.write_to(stream)?;
        }
    }

    /// Dispatches one call and produces the content to write back.
    ///
    /// The call is always discarded before this returns, success or error,
    /// so the stream sits at the next envelope boundary; the call scope is
    /// likewise always exited.
    fn dispatch_call<S>(
        &self,
        header: Header,
        stream: &mut S,
        request_scope: &mut ScopeContext,
        call_scope: &mut ScopeContext,
    ) -> Result<Content, ConnectionError>
    where
        S: Read + Write + Send,
    {
        // Lookup happens before the filter chain; a resolution failure
        // yields error content without invoking any filter. The call is
        // still constructed so its payload can be discarded.
        let resolution = self.registry.resolve(header.routing_name());
        let descriptor = CallDescriptor {
            routing_name: self.registry.resolved_name(header.routing_name()),
            call_type: header.call_type(),
            content_length: header.content_length(),
        };

        let mut call = Call::bind(header, stream)?;

        call_scope.enter()?;
        let produced: Result<Content, ConnectionError> = (|| {
            call_scope.seed(CURRENT_CALL, descriptor)?;
            Ok(match resolution {
                Err(not_found) => {
                    debug!(target: COMMUNICATOR_TARGET, %not_found, "unresolved call");
                    Content::error(not_found)
                }
                Ok(binding) => {
                    let mut ctx = CallContext {
                        request: request_scope,
                        call: call_scope,
                    };
                    let mut chain = FilterChain::new(&self.filters, &binding);
                    match chain.proceed(&mut call, &mut ctx) {
                        Ok(content) => content,
                        Err(error) => {
                            warn!(
                                target: COMMUNICATOR_TARGET,
                                command = binding.name(),
                                %error,
                                "filter aborted call"
                            );
                            Content::error(error)
                        }
                    }
                }
            })
        })();

        let discarded = call.discard();
        drop(call);
        let exited = call_scope.exit();

        let content = produced?;
        discarded?;
        exited?;
        Ok(content)
    }
}

impl crate::transport::ConnectionHandler for Communicator {
    fn handle(&self, mut stream: crate::transport::ConnectionStream) {
        let peer = stream.peer_label();
        match self.communicate(&mut stream) {
            Ok(()) => {
                debug!(target: COMMUNICATOR_TARGET, %peer, "connection finished");
            }
            Err(error) => {
                warn!(target: COMMUNICATOR_TARGET, %peer, %error, "connection aborted");
            }
        }
        // Dropping the stream here closes the socket, exactly once.
    }
}

/// Flattens the handshake object into string-valued client variables.
fn client_vars_from(value: &Value) -> HashMap<String, String> {
    value
        .as_object()
        .map(|object| {
            object
                .iter()
                .map(|(key, entry)| {
                    let rendered = match entry {
                        Value::String(text) => text.clone(),
                        other => other.to_string(),
                    };
                    (key.clone(), rendered)
                })
                .collect()
        })
        .unwrap_or_default()
}
