//! Error taxonomy for wire-level failures.
//!
//! Every variant here is connection-fatal: once the codec has lost track of
//! the byte stream there is no safe way to resume parsing, so the owning
//! connection must be torn down. Recoverable, per-call failures live in
//! [`crate::CallError`] instead.

use std::io;

use thiserror::Error;

/// Connection-fatal protocol failures.
#[derive(Debug, Error)]
pub enum WireError {
    /// The envelope was malformed or violated a framing limit.
    #[error("framing error: {message}")]
    Framing {
        /// What the codec observed.
        message: String,
    },

    /// The peer vanished: premature end of stream or a transport error
    /// while a unit was still being read.
    #[error("connection lost: {context}")]
    ConnectionLost {
        /// Where in the protocol the stream broke.
        context: &'static str,
        /// Transport error, when one was reported.
        #[source]
        source: Option<io::Error>,
    },

    /// A structurally valid unit arrived in a state that forbids it.
    #[error("protocol violation: {message}")]
    Violation {
        /// Which rule the peer broke.
        message: String,
    },

    /// Writing a response failed.
    #[error("response write failed: {0}")]
    Io(#[from] io::Error),
}

impl WireError {
    /// Creates a framing error.
    pub fn framing(message: impl Into<String>) -> Self {
        Self::Framing {
            message: message.into(),
        }
    }

    /// Creates a connection-lost error without a transport cause.
    #[must_use]
    pub fn lost(context: &'static str) -> Self {
        Self::ConnectionLost {
            context,
            source: None,
        }
    }

    /// Creates a connection-lost error wrapping a transport failure.
    #[must_use]
    pub fn lost_io(context: &'static str, source: io::Error) -> Self {
        Self::ConnectionLost {
            context,
            source: Some(source),
        }
    }

    /// Creates a protocol violation.
    pub fn violation(message: impl Into<String>) -> Self {
        Self::Violation {
            message: message.into(),
        }
    }
}
