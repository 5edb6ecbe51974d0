//! Daemon bootstrap orchestration.
//!
//! Startup is an explicit ordered sequence: load and validate the
//! configuration, install telemetry, prepare the socket filesystem, build
//! the session manager and command registry, assemble the communicator,
//! and finally bind and start the connector. There is no reflective
//! wiring; every collaborator is constructed from the configuration
//! struct and handed down.

use std::sync::Arc;

use ortho_config::OrthoError;
use thiserror::Error;
use tracing::info;

use gangway_config::{Config, InvalidConfig, SocketPreparationError};

use crate::communicator::Communicator;
use crate::context::ConnectionHook;
use crate::dispatch::{CallFilter, CommandRegistry, DuplicateBinding, register_builtins};
use crate::session::{SessionManager, SessionSweeper};
use crate::telemetry::{self, TelemetryError, TelemetryHandle};
use crate::transport::{ConnectionHandler, ConnectorError, ConnectorHandle, SocketConnector, WorkerPool};

const BOOTSTRAP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::bootstrap");

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the daemon configuration.
    ///
    /// # Errors
    ///
    /// Returns the layered loader's failure.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Configuration loaded but violates a constraint.
    #[error("invalid configuration: {source}")]
    InvalidConfiguration {
        /// The violated constraint.
        #[from]
        source: InvalidConfig,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// Socket preparation failed.
    #[error("failed to prepare daemon socket: {source}")]
    Socket {
        /// Filesystem error reported while preparing the socket directory.
        #[source]
        source: SocketPreparationError,
    },
    /// Command registration collided.
    #[error("failed to build command registry: {source}")]
    Registry {
        /// The clashing registration.
        #[from]
        source: DuplicateBinding,
    },
    /// Binding or starting the connector failed.
    #[error("failed to start connector: {source}")]
    Connector {
        /// Underlying connector error.
        #[from]
        source: ConnectorError,
    },
}

/// An assembled, not-yet-listening bridge.
pub struct Bridge {
    config: Config,
    communicator: Arc<Communicator>,
    sessions: Arc<SessionManager>,
    telemetry: TelemetryHandle,
}

impl Bridge {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Accessor for the session manager.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Binds the endpoint and starts serving connections.
    ///
    /// # Errors
    ///
    /// [`BootstrapError::Connector`] when the bind or the accept thread
    /// fails; a bind failure must abort daemon startup with a non-zero
    /// exit.
    pub fn serve(&self) -> Result<RunningBridge, BootstrapError> {
        let pool = WorkerPool::new(self.config.pool.clone());
        let connector = SocketConnector::bind(&self.config.listen, pool, self.config.socket_timeout())?;
        let handler: Arc<dyn ConnectionHandler> = self.communicator.clone();
        let connector = connector.start(handler)?;
        let sweeper = SessionSweeper::start(Arc::clone(&self.sessions), self.config.session.clone());
        info!(
            target: BOOTSTRAP_TARGET,
            endpoint = %self.config.listen,
            "bridge serving"
        );
        Ok(RunningBridge { connector, sweeper })
    }
}

/// A bridge with a live connector and expiry sweeper.
#[derive(Debug)]
pub struct RunningBridge {
    connector: ConnectorHandle,
    sweeper: SessionSweeper,
}

impl RunningBridge {
    /// The bound local address, when the endpoint is TCP.
    #[must_use]
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.connector.local_addr()
    }

    /// Stops accepting, drains in-flight connections, and stops the
    /// sweeper.
    ///
    /// # Errors
    ///
    /// Propagates the connector's shutdown failure.
    pub fn shutdown(self, timeout: std::time::Duration) -> Result<(), ConnectorError> {
        self.sweeper.stop();
        self.connector.stop(timeout)
    }
}

/// Bootstraps the bridge using the supplied configuration loader and the
/// built-in command set.
///
/// # Errors
///
/// [`BootstrapError`] naming the failed startup stage.
pub fn bootstrap_with(loader: &dyn ConfigLoader) -> Result<Bridge, BootstrapError> {
    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })?;

    let sessions = Arc::new(SessionManager::new());
    let mut registry = CommandRegistry::new(config.routing.aliases.clone());
    register_builtins(&mut registry, &sessions)?;

    assemble(config, registry, sessions, Vec::new(), Vec::new())
}

/// Assembles a bridge from explicit parts.
///
/// This is the seam embedding code and tests use to supply their own
/// commands, filters and hooks; `bootstrap_with` layers the built-in
/// command set on top of it.
///
/// # Errors
///
/// [`BootstrapError`] naming the failed startup stage.
pub fn assemble(
    config: Config,
    registry: CommandRegistry,
    sessions: Arc<SessionManager>,
    filters: Vec<Arc<dyn CallFilter>>,
    hooks: Vec<Arc<dyn ConnectionHook>>,
) -> Result<Bridge, BootstrapError> {
    config.validate()?;
    let telemetry = telemetry::initialise(&config)
        .map_err(|source| BootstrapError::Telemetry { source })?;
    config
        .listen
        .prepare_filesystem()
        .map_err(|source| BootstrapError::Socket { source })?;

    let communicator = Arc::new(Communicator::new(
        Arc::new(registry),
        Arc::clone(&sessions),
        filters,
        hooks,
    ));

    Ok(Bridge {
        config,
        communicator,
        sessions,
        telemetry,
    })
}
