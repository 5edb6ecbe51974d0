//! Shared configuration for the gangway bridge daemon and client.
//!
//! Configuration is resolved in layers: built-in defaults, an optional TOML
//! file (`--config-path`), environment variables prefixed with `GANGWAY_`,
//! and finally command-line flags. The [`Config`] struct is the merged
//! result consumed by `gangwayd` at bootstrap and by `gangway` when it needs
//! to locate the daemon endpoint.

mod defaults;
mod logging;
mod pool;
mod routing;
mod session;
mod socket;

use std::sync::Arc;
use std::time::Duration;

use ortho_config::{OrthoConfig, OrthoError};
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_LOG_FILTER, DEFAULT_TCP_PORT, default_listen_endpoint, default_log_filter,
    default_log_filter_string, default_log_format,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use pool::PoolSettings;
pub use routing::{AliasRule, RoutingSettings};
pub use session::SessionSettings;
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Merged daemon configuration.
///
/// Fields are public so tests and embedding code can construct a
/// configuration directly; production code goes through [`Config::load`].
#[derive(Debug, Clone, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "GANGWAY")]
pub struct Config {
    /// Endpoint the daemon listens on.
    #[serde(default = "defaults::default_listen_endpoint")]
    pub listen: SocketEndpoint,

    /// Tracing filter expression (`tracing_subscriber::EnvFilter` syntax).
    #[serde(default = "defaults::default_log_filter_string")]
    pub log_filter: String,

    /// Output format for daemon logs.
    #[serde(default = "defaults::default_log_format")]
    pub log_format: LogFormat,

    /// Read/write timeout applied to every accepted connection, in seconds.
    ///
    /// A stalled peer faults with an I/O error once the timeout elapses,
    /// which tears the connection down instead of pinning a worker forever.
    #[serde(default = "defaults::default_socket_timeout_secs")]
    pub socket_timeout_secs: u64,

    /// Worker pool sizing for connection handling.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub pool: PoolSettings,

    /// Session retention policy.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub session: SessionSettings,

    /// Routing-name alias rules applied before command lookup.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub routing: RoutingSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: defaults::default_listen_endpoint(),
            log_filter: defaults::default_log_filter_string(),
            log_format: defaults::default_log_format(),
            socket_timeout_secs: defaults::default_socket_timeout_secs(),
            pool: PoolSettings::default(),
            session: SessionSettings::default(),
            routing: RoutingSettings::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the process environment and arguments.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`OrthoError`] when a layer fails to parse or
    /// the merged result does not deserialize.
    pub fn load() -> Result<Self, Arc<OrthoError>> {
        <Self as OrthoConfig>::load()
    }

    /// Loads configuration from an explicit argument iterator.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`OrthoError`] when a layer fails to parse or
    /// the merged result does not deserialize.
    pub fn load_from_iter<I, T>(args: I) -> Result<Self, Arc<OrthoError>>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        <Self as OrthoConfig>::load_from_iter(args)
    }

    /// Read/write timeout for accepted connections.
    #[must_use]
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_secs)
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Validates cross-field constraints the type system cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidConfig`] naming the first violated constraint.
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        self.pool.validate()?;
        self.session.validate()?;
        if self.socket_timeout_secs == 0 {
            return Err(InvalidConfig::ZeroSocketTimeout);
        }
        Ok(())
    }
}

/// Constraint violations in an otherwise well-formed configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvalidConfig {
    /// The pool must be allowed at least one worker.
    #[error("pool.max_workers must be at least 1")]
    NoWorkers,
    /// Minimum pool size cannot exceed the maximum.
    #[error("pool.min_workers ({min}) exceeds pool.max_workers ({max})")]
    PoolSizeInverted {
        /// Configured minimum.
        min: usize,
        /// Configured maximum.
        max: usize,
    },
    /// Sessions would be swept immediately.
    #[error("session.max_idle_secs must be non-zero")]
    ZeroSessionRetention,
    /// A zero socket timeout would disable stall detection entirely.
    #[error("socket_timeout_secs must be non-zero")]
    ZeroSocketTimeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        config.validate().expect("defaults must validate");
        assert!(matches!(config.listen, SocketEndpoint::Tcp { .. }));
    }

    #[test]
    fn rejects_inverted_pool_sizes() {
        let mut config = Config::default();
        config.pool.min_workers = 8;
        config.pool.max_workers = 2;
        assert_eq!(
            config.validate(),
            Err(InvalidConfig::PoolSizeInverted { min: 8, max: 2 })
        );
    }

    #[test]
    fn rejects_zero_socket_timeout() {
        let mut config = Config::default();
        config.socket_timeout_secs = 0;
        assert_eq!(config.validate(), Err(InvalidConfig::ZeroSocketTimeout));
    }
}
