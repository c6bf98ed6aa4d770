//! Orchestrator configuration (spec.md §6's enumerated options not already owned by another
//! crate's own `Config`).

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_start_height")]
    pub start_height: i64,

    #[serde(default = "default_batch_size")]
    pub batch_size: i64,

    #[serde(default = "default_enable_historical_indexing")]
    pub enable_historical_indexing: bool,

    #[serde(with = "humantime_serde", default = "default_inter_batch_pause")]
    pub inter_batch_pause: Duration,

    #[serde(default)]
    pub retry_sweep: RetrySweepConfig,

    #[serde(with = "humantime_serde", default = "default_shutdown_deadline")]
    pub shutdown_deadline: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            start_height: default_start_height(),
            batch_size: default_batch_size(),
            enable_historical_indexing: default_enable_historical_indexing(),
            inter_batch_pause: default_inter_batch_pause(),
            retry_sweep: RetrySweepConfig::default(),
            shutdown_deadline: default_shutdown_deadline(),
        }
    }
}

fn default_start_height() -> i64 {
    1
}

fn default_batch_size() -> i64 {
    100
}

fn default_enable_historical_indexing() -> bool {
    true
}

fn default_inter_batch_pause() -> Duration {
    Duration::from_millis(100)
}

fn default_shutdown_deadline() -> Duration {
    Duration::from_secs(30)
}

/// SPEC_FULL.md §10.8's supplemented retry sweeper for the `failed_blocks` table.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySweepConfig {
    #[serde(with = "humantime_serde", default = "default_sweep_interval")]
    pub interval: Duration,

    #[serde(default = "default_sweep_batch_size")]
    pub batch_size: i64,
}

impl Default for RetrySweepConfig {
    fn default() -> Self {
        Self {
            interval: default_sweep_interval(),
            batch_size: default_sweep_batch_size(),
        }
    }
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_sweep_batch_size() -> i64 {
    50
}
