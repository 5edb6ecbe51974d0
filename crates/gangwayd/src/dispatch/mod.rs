//! Command resolution and execution.
//!
//! A dispatched call travels through three layers: the [`CommandRegistry`]
//! maps its routing name (after at most one alias rewrite) to a
//! [`CommandBinding`]; the [`FilterChain`] threads the call through every
//! interceptor whose matcher accepts the binding; and the [`Command`] at
//! the end of the chain produces the response [`gangway_protocol::Content`].
//!
//! Resolution failures, command failures and filter failures are all
//! recoverable: the communicator converts them to error content and keeps
//! the connection alive.

mod builtin;
mod command;
mod filter;
mod registry;

pub use builtin::register_builtins;
pub use command::{Command, CommandError};
pub use filter::{CallFilter, FilterChain, FilterError, Matcher};
pub use registry::{CommandBinding, CommandNotFound, CommandRegistry, DuplicateBinding};

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");
