//! Session retention policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::InvalidConfig;

const DEFAULT_MAX_IDLE_SECS: u64 = 1800;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Retention window and sweep cadence for server-side sessions.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SessionSettings {
    /// Idle time after which a session becomes eligible for expiry, in seconds.
    #[serde(default = "default_max_idle_secs")]
    pub max_idle_secs: u64,
    /// Interval between expiry sweeps, in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_idle_secs: DEFAULT_MAX_IDLE_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

impl SessionSettings {
    /// Idle retention window.
    #[must_use]
    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }

    /// Cadence of the background expiry sweep.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub(crate) fn validate(&self) -> Result<(), InvalidConfig> {
        if self.max_idle_secs == 0 {
            return Err(InvalidConfig::ZeroSessionRetention);
        }
        Ok(())
    }
}

fn default_max_idle_secs() -> u64 {
    DEFAULT_MAX_IDLE_SECS
}

fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}
