//! Daemon process supervision: startup, signal handling, shutdown.

use std::io;

use signal_hook::consts::signal::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::info;

use crate::bootstrap::{BootstrapError, SystemConfigLoader, bootstrap_with};
use crate::transport::ConnectorError;

const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");

/// Errors surfaced while launching or supervising the daemon process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Bootstrap or serving failed.
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Signals {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// Shutdown did not complete cleanly.
    #[error("shutdown failed: {source}")]
    Shutdown {
        /// Underlying connector error.
        #[from]
        source: ConnectorError,
    },
}

/// Runs the daemon until a termination signal arrives.
///
/// # Errors
///
/// [`LaunchError`] when startup fails (the caller must exit non-zero) or
/// when shutdown does not complete within the configured grace period.
pub fn run_daemon() -> Result<(), LaunchError> {
    let bridge = bootstrap_with(&SystemConfigLoader)?;
    let shutdown_timeout = bridge.config().pool.shutdown_timeout();
    let running = bridge.serve()?;

    let mut signals =
        Signals::new([SIGINT, SIGTERM, SIGQUIT]).map_err(|source| LaunchError::Signals { source })?;
    let received = signals.forever().next();
    info!(target: PROCESS_TARGET, signal = ?received, "termination signal received");

    running.shutdown(shutdown_timeout)?;
    info!(target: PROCESS_TARGET, "daemon stopped");
    Ok(())
}
