//! Scheduler configuration.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};

/// Scheduler daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Time between due-schedule scans.
    pub interval: Duration,

    /// Seed file loaded into the in-memory store at startup.
    pub seed_path: Option<PathBuf>,
}

impl SchedulerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let interval_secs: u64 = std::env::var("ACTIONFLOW_SCHEDULER_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);
        if interval_secs == 0 {
            bail!("ACTIONFLOW_SCHEDULER_INTERVAL_SECS must be at least 1");
        }

        let seed_path = std::env::var("ACTIONFLOW_SEED_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            interval: Duration::from_secs(interval_secs),
            seed_path,
        })
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            seed_path: None,
        }
    }
}
