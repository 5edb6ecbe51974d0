//! Worker pool sizing for connection handling.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::InvalidConfig;

const DEFAULT_MIN_WORKERS: usize = 2;
const DEFAULT_MAX_WORKERS: usize = 16;
const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// Bounds for the connection worker pool.
///
/// The maximum worker count bounds how many connections are served
/// concurrently; further accepted sockets wait for a free worker. Workers
/// above the minimum exit after sitting idle for the keep-alive window.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PoolSettings {
    /// Workers kept alive even when idle.
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,
    /// Upper bound on concurrent workers.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Idle time after which surplus workers exit, in seconds.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// How long shutdown waits for in-flight connections, in seconds.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_workers: DEFAULT_MIN_WORKERS,
            max_workers: DEFAULT_MAX_WORKERS,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

impl PoolSettings {
    /// Idle keep-alive window for surplus workers.
    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Grace period granted to in-flight connections during shutdown.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub(crate) fn validate(&self) -> Result<(), InvalidConfig> {
        if self.max_workers == 0 {
            return Err(InvalidConfig::NoWorkers);
        }
        if self.min_workers > self.max_workers {
            return Err(InvalidConfig::PoolSizeInverted {
                min: self.min_workers,
                max: self.max_workers,
            });
        }
        Ok(())
    }
}

fn default_min_workers() -> usize {
    DEFAULT_MIN_WORKERS
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

fn default_keep_alive_secs() -> u64 {
    DEFAULT_KEEP_ALIVE_SECS
}

fn default_shutdown_timeout_secs() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_SECS
}
