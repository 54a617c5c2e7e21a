use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{RepairError, RepairResult};

pub const DEFAULT_BATCH_THRESHOLD: usize = 4;
pub const DEFAULT_EPOCH_TIMEOUT_SECS: u64 = 60 * 60;
pub const DEFAULT_IDLE_INTERVAL_SECS: u64 = 15 * 60;
pub const DEFAULT_FAILURE_COOLDOWN_SECS: u64 = 60 * 60;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// While the worst chunk has at least this many gaps, a chunk is only repaired when
    /// this many useful workers are idle at once.
    pub batch_threshold: usize,
    /// An epoch older than this waits for every active worker, then rebuilds the matrix.
    pub epoch_timeout_secs: u64,
    /// Sleep between rebuilds when there is nothing to repair.
    pub idle_interval_secs: u64,
    /// A worker that failed an upload sits out of epochs for this long.
    pub failure_cooldown_secs: u64,
    pub worker_queue_capacity: usize,
    pub new_file_queue_capacity: usize,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            batch_threshold: DEFAULT_BATCH_THRESHOLD,
            epoch_timeout_secs: DEFAULT_EPOCH_TIMEOUT_SECS,
            idle_interval_secs: DEFAULT_IDLE_INTERVAL_SECS,
            failure_cooldown_secs: DEFAULT_FAILURE_COOLDOWN_SECS,
            worker_queue_capacity: 1,
            new_file_queue_capacity: 64,
        }
    }
}

impl RepairConfig {
    pub fn from_toml_str(content: &str) -> RepairResult<Self> {
        let config: RepairConfig = toml::from_str(content).map_err(|err| {
            error!("parse repair config failed! {}", err);
            RepairError::ParserConfigError(format!("Failed to parse RepairConfig TOML: {}", err))
        })?;
        // tokio channels refuse a zero capacity
        Ok(Self {
            worker_queue_capacity: config.worker_queue_capacity.max(1),
            new_file_queue_capacity: config.new_file_queue_capacity.max(1),
            ..config
        })
    }

    pub async fn load_from_file(path: &Path) -> RepairResult<Self> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|err| {
            error!("read repair config failed! {}", err);
            RepairError::ReadConfigError(path.to_string_lossy().to_string())
        })?;
        let config = Self::from_toml_str(&contents)?;
        info!(
            "load repair config from {} success!",
            path.to_string_lossy()
        );
        Ok(config)
    }

    pub fn epoch_timeout(&self) -> Duration {
        Duration::from_secs(self.epoch_timeout_secs)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_secs)
    }
}
