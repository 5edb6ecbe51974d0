//! Scope keys and the execution context handed to commands.

use std::collections::HashMap;
use std::sync::Arc;

use gangway_protocol::CallType;

use crate::scope::{Key, ScopeContext, ScopeError};
use crate::session::Session;

/// Request-scope key: the session bound to the connection at `open`.
pub const CURRENT_SESSION: Key<Arc<Session>> = Key::new("current-session");

/// Request-scope key: client environment variables from the handshake.
pub const CLIENT_VARS: Key<HashMap<String, String>> = Key::new("client-vars");

/// Call-scope key: envelope metadata of the call being dispatched.
pub const CURRENT_CALL: Key<CallDescriptor> = Key::new("current-call");

/// Envelope metadata seeded into the call scope for each dispatched call.
///
/// The call itself borrows the connection's input stream and therefore
/// cannot live in the scope; commands receive it as an explicit argument
/// and filters reach the metadata through this descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallDescriptor {
    /// Routing name after alias expansion.
    pub routing_name: String,
    /// Wire call type.
    pub call_type: CallType,
    /// Declared payload size.
    pub content_length: u64,
}

/// The two scope granularities available while a call executes.
#[derive(Debug)]
pub struct CallContext<'a> {
    /// Scope spanning the whole connection.
    pub request: &'a mut ScopeContext,
    /// Scope spanning this call only.
    pub call: &'a mut ScopeContext,
}

impl CallContext<'_> {
    /// The session the connection was opened with.
    ///
    /// # Errors
    ///
    /// [`ScopeError::OutOfScope`] when the request scope is not entered or
    /// the engine has not seeded a session.
    pub fn session(&self) -> Result<Arc<Session>, ScopeError> {
        self.request
            .get(CURRENT_SESSION)?
            .cloned()
            .ok_or(ScopeError::OutOfScope {
                scope: self.request.name(),
                key: CURRENT_SESSION.name(),
            })
    }
}

/// Per-connection request data handed to connection hooks.
#[derive(Debug)]
pub struct BridgeRequest {
    session: Arc<Session>,
    client_vars: HashMap<String, String>,
}

impl BridgeRequest {
    /// Bundles the handshake outcome.
    #[must_use]
    pub fn new(session: Arc<Session>, client_vars: HashMap<String, String>) -> Self {
        Self {
            session,
            client_vars,
        }
    }

    /// The session bound to this connection.
    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Client environment variables sent with the handshake.
    #[must_use]
    pub fn client_vars(&self) -> &HashMap<String, String> {
        &self.client_vars
    }
}

/// Observer invoked around a connection's active phase.
///
/// `before` runs after the handshake succeeds and before the request scope
/// is entered; `after` runs during teardown, for both graceful closes and
/// failures. Hooks are registered at bootstrap in an explicit order.
pub trait ConnectionHook: Send + Sync {
    /// Invoked once per connection before the first dispatched call.
    fn before(&self, request: &BridgeRequest) {
        let _ = request;
    }

    /// Invoked once per connection during teardown.
    fn after(&self, request: &BridgeRequest) {
        let _ = request;
    }
}
