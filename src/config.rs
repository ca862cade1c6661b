use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// Timing knobs for a single Raft peer. All values are milliseconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RaftConfig {
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub tick_interval_ms: u64,
}

impl Default for RaftConfig {
    fn default() -> Self {
        RaftConfig {
            election_timeout_min_ms: 300,
            election_timeout_max_ms: 500,
            heartbeat_interval_ms: 100,
            tick_interval_ms: 10,
        }
    }
}

impl RaftConfig {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: RaftConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Draw a fresh election timeout from the configured window.
    pub(crate) fn random_election_timeout(&self) -> Duration {
        let ms = rand::thread_rng()
            .gen_range(self.election_timeout_min_ms..self.election_timeout_max_ms);
        Duration::from_millis(ms)
    }

    pub(crate) fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub(crate) fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
