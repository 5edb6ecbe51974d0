//! Socket transport for the bridge daemon.
//!
//! The transport binds the configured endpoint, accepts connections on a
//! background thread, and hands each accepted socket to a bounded worker
//! pool running the connection handler. Pool saturation applies
//! backpressure to the accept loop instead of dropping connections.

mod connector;
mod errors;
mod handler;
mod pool;

pub use self::connector::{ConnectorHandle, ConnectorState, SocketConnector};
pub use self::errors::ConnectorError;
pub use self::handler::{ConnectionHandler, ConnectionStream};
pub use self::pool::{PoolError, WorkerPool};

const TRANSPORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
