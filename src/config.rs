//! Core configuration consumed by the pipeline and the cluster client.
//!
//! Loading (files, environment, CLI) is the embedding service's concern;
//! this module only defines the typed shape with serde defaults so a
//! deserialized fragment with missing keys still yields a usable config.

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the control plane.
///
/// All durations are stored in the unit the corresponding setting is
/// expressed in (seconds, minutes) and exposed as [`Duration`] accessors.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds to sleep after a cluster mutation before re-reading topology.
    pub refresh_timeout_secs: u64,
    /// Seconds to accumulate a batch in the add/remove stages.
    pub batch_period_secs: u64,
    /// Minimum seconds between two reshards.
    pub reshard_interval_secs: u64,
    /// Maximum seconds for a whole reshard.
    pub reshard_timeout_secs: u64,
    /// Maximum seconds for moving the keys of a single slot.
    pub migrate_slot_timeout_secs: u64,
    /// Seed hosts used to bootstrap the cluster client.
    pub seed_servers: Vec<String>,
    /// Port assumed when a task target names only a host.
    pub default_port: u16,
    /// Minutes between the cluster client's periodic topology refreshes.
    pub topology_refresh_interval_mins: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_timeout_secs: 5,
            batch_period_secs: 5,
            reshard_interval_secs: 60,
            reshard_timeout_secs: 300,
            migrate_slot_timeout_secs: 60,
            seed_servers: Vec::new(),
            default_port: 6379,
            topology_refresh_interval_mins: 60,
        }
    }
}

impl Config {
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }

    pub fn batch_period(&self) -> Duration {
        Duration::from_secs(self.batch_period_secs)
    }

    pub fn reshard_interval(&self) -> Duration {
        Duration::from_secs(self.reshard_interval_secs)
    }

    pub fn reshard_timeout(&self) -> Duration {
        Duration::from_secs(self.reshard_timeout_secs)
    }

    pub fn migrate_slot_timeout(&self) -> Duration {
        Duration::from_secs(self.migrate_slot_timeout_secs)
    }

    pub fn topology_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.topology_refresh_interval_mins * 60)
    }
}
