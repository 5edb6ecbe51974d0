//! Wire-level types for the gangway bridge protocol.
//!
//! Every unit on the wire is a self-delimiting ASCII envelope followed by a
//! length-bounded payload:
//!
//! ```text
//! <type>://<name>/<session-id>/(<content-length>)?<payload>
//! ```
//!
//! Responses use the same shape with a MIME token in place of the call
//! type and without routing fields:
//!
//! ```text
//! <mime>://(<length>)?<body>
//! ```
//!
//! The envelope is parsed byte-by-byte so the codec never needs payload
//! bytes to finish parsing, and the payload reader is gated on the declared
//! content length so a misbehaving handler can never desynchronise the
//! stream. This crate is shared by the daemon (`gangwayd`) and the
//! diagnostic client (`gangway`).

mod call;
mod content;
mod errors;
mod header;
mod read;

pub use call::{Call, CallError, FormMap};
pub use content::{Content, ContentKind, ResponseHeader};
pub use errors::WireError;
pub use header::{CallType, Header, MAX_CONTENT_LENGTH};
