//! The gangway bridge daemon.
//!
//! `gangwayd` accepts persistent socket connections from remote frontend
//! processes and executes server-side commands on their behalf. Each
//! connection speaks a framed wire protocol: an `open` handshake binds a
//! session, a sequence of typed calls is dispatched through a filter chain
//! to registered commands, and a `close` sentinel ends the conversation.
//!
//! The engine is split along its seams:
//!
//! - [`transport`] binds the endpoint and feeds accepted sockets to a
//!   bounded worker pool.
//! - [`communicator`] drives one connection's protocol state machine.
//! - [`dispatch`] resolves routing names and wraps commands in filters.
//! - [`scope`] provides the per-connection and per-call singleton caches.
//! - [`session`] manages server-side state shared across connections.
//!
//! Recoverable failures (unknown command, command or filter errors) are
//! answered with error content on the same connection; framing and
//! transport failures tear the connection down and are logged as
//! anomalies.

pub mod bootstrap;
pub mod communicator;
pub mod context;
pub mod dispatch;
pub mod process;
pub mod scope;
pub mod session;
pub mod telemetry;
pub mod transport;

pub use bootstrap::{
    Bridge, BootstrapError, ConfigLoader, RunningBridge, SystemConfigLoader, assemble,
    bootstrap_with,
};
pub use communicator::{Communicator, ConnectionError};
pub use process::{LaunchError, run_daemon};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
