//! Built-in defaults shared by the daemon and client binaries.

use crate::logging::LogFormat;
use crate::socket::SocketEndpoint;

/// Default TCP port the bridge listens on.
pub const DEFAULT_TCP_PORT: u16 = 7411;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default read/write timeout for accepted sockets, in seconds.
pub const DEFAULT_SOCKET_TIMEOUT_SECS: u64 = 30;

/// Default log filter expression used by the binaries.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

/// Default logging format for the binaries.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

/// Computes the default listen endpoint for the daemon.
///
/// Frontends traditionally connect over loopback TCP, so the default stays
/// on `127.0.0.1` rather than a Unix socket.
#[must_use]
pub fn default_listen_endpoint() -> SocketEndpoint {
    SocketEndpoint::tcp("127.0.0.1", DEFAULT_TCP_PORT)
}

/// Default read/write timeout for accepted sockets.
#[must_use]
pub fn default_socket_timeout_secs() -> u64 {
    DEFAULT_SOCKET_TIMEOUT_SECS
}
