use ring::Endpoint;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Per-node configuration. Durations accept humane forms ("10s", "250ms").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub cluster_name: String,
    pub listen: Endpoint,
    pub data_dir: PathBuf,

    /// Absolute deadline budget for one coordinated request.
    #[serde(default = "default_rpc_timeout", with = "humantime_serde")]
    pub rpc_timeout: Duration,

    /// Settling pause before ring-movement announcements take effect.
    #[serde(default = "default_ring_delay", with = "humantime_serde")]
    pub ring_delay: Duration,

    /// Optional pause between replayed hints.
    #[serde(default, with = "humantime_serde::option")]
    pub hint_throttle: Option<Duration>,

    /// Workers draining weak-read consistency checks.
    #[serde(default = "default_consistency_workers")]
    pub consistency_workers: usize,
}

fn default_rpc_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_ring_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_consistency_workers() -> usize {
    4
}

impl NodeConfig {
    pub fn hints_dir(&self) -> PathBuf {
        self.data_dir.join("hints")
    }

    pub fn system_record_path(&self) -> PathBuf {
        self.data_dir.join("system.json")
    }
}
