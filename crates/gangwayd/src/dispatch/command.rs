//! The command contract.

use std::error::Error;

use gangway_protocol::{Call, CallError, Content};

use crate::context::CallContext;
use crate::scope::ScopeError;

/// Failure raised by command logic.
///
/// The engine converts these to error content without killing the
/// connection; a single bad call never terminates a healthy connection.
#[derive(Debug, thiserror::Error)]
#[error("command failed: {message}")]
pub struct CommandError {
    message: String,
    #[source]
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl CommandError {
    /// Creates a failure from a plain message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a failure wrapping an underlying error.
    pub fn with_source(
        message: impl Into<String>,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<CallError> for CommandError {
    fn from(error: CallError) -> Self {
        let message = error.to_string();
        Self {
            message,
            source: Some(Box::new(error)),
        }
    }
}

impl From<ScopeError> for CommandError {
    fn from(error: ScopeError) -> Self {
        let message = error.to_string();
        Self {
            message,
            source: Some(Box::new(error)),
        }
    }
}

/// A server-side handler resolved by routing name.
///
/// Implementations are stateless or hold singleton services; one command
/// instance serves every connection concurrently.
pub trait Command: Send + Sync {
    /// Executes the call and produces its content.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] on a business failure; the engine answers
    /// the client with error content and continues the connection.
    fn execute(
        &self,
        call: &mut Call<'_>,
        ctx: &mut CallContext<'_>,
    ) -> Result<Content, CommandError>;
}
