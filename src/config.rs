use std::{path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::error::{Result, TrinityError};

/// Epochs of side traffic the monitor's inboxes can hold between two polls.
const MONITOR_EPOCHS: usize = 4;

/// Read-only settings consumed by the orchestration core.
///
/// Loading them from disk is the caller's business, the struct only knows
/// how to be deserialized and validated.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Workers in the cluster (top) tier.
    pub n_cluster: usize,
    /// Workers in the server (middle) tier.
    pub n_server: usize,
    /// Workers in the core (bottom) tier.
    pub n_core: usize,
    /// Directory holding the status file and the summary store.
    pub model_dir: PathBuf,
    /// Status file name inside `model_dir`.
    pub stat_file: String,
    /// Enables the dashboard forwarding pipeline.
    pub log: bool,
    /// Execution target hint, passed through to worker initialization untouched.
    pub device: String,
    /// Capacity of every (channel, node) inbox.
    ///
    /// Parents drain their children's traffic every epoch, so this must hold
    /// one epoch of experience: `n_server * n_core * ticks_per_epoch`
    /// rollouts reach the trainer. The monitor's inboxes are sized apart, see
    /// [`Config::monitor_capacity`].
    pub channel_capacity: usize,
    /// Bounded wait used by parents collecting their children's side traffic.
    pub sync_timeout_ms: u64,
    /// Period of the utilization monitor's polling. The epoch loop also polls
    /// it after every epoch, so a long period never lets its inboxes fill.
    pub monitor_interval_ms: u64,
    /// Environment ticks a server runs per epoch.
    pub ticks_per_epoch: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            n_cluster: 1,
            n_server: 1,
            n_core: 1,
            model_dir: PathBuf::from("resource/exps/default"),
            stat_file: "stats.txt".to_string(),
            log: false,
            device: "cpu".to_string(),
            channel_capacity: 1024,
            sync_timeout_ms: 50,
            monitor_interval_ms: 1000,
            ticks_per_epoch: 32,
        }
    }
}

impl Config {
    /// Checks the invariants the rest of the crate relies on.
    ///
    /// # Returns
    /// `InvalidConfig` describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.n_cluster == 0 {
            return Err(TrinityError::InvalidConfig(
                "n_cluster must be at least 1, the epoch loop steps cluster worker 0".into(),
            ));
        }

        if self.channel_capacity == 0 {
            return Err(TrinityError::InvalidConfig(
                "channel_capacity must be greater than 0".into(),
            ));
        }

        if self.stat_file.is_empty() {
            return Err(TrinityError::InvalidConfig("stat_file must not be empty".into()));
        }

        Ok(())
    }

    /// Full path of the textual status file.
    pub fn stat_path(&self) -> PathBuf {
        self.model_dir.join(&self.stat_file)
    }

    /// Full path of the append-only summary store.
    pub fn store_path(&self) -> PathBuf {
        self.model_dir.join(crate::telemetry::store::STORE_FILE)
    }

    /// Utilization samples and server logs the monitor receives per epoch.
    pub fn monitor_traffic(&self) -> usize {
        let cores = self.n_server * self.n_core * self.ticks_per_epoch;
        cores + 2 * self.n_server + self.n_cluster
    }

    /// Bound of the monitor's inboxes, never below `channel_capacity`.
    pub fn monitor_capacity(&self) -> usize {
        self.channel_capacity.max(MONITOR_EPOCHS * self.monitor_traffic())
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}
