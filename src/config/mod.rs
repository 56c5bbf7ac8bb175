use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{
    disk::FailureKind,
    error::{Error, Result},
    region::RegionConfig,
};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    pub erasure: ErasureConfig,
    #[serde(default)]
    pub region: RegionConfig,
    pub disks: Vec<DiskConfig>,
}

impl Config {
    pub async fn from_path(path: PathBuf) -> Result<Self> {
        let c = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&c).map_err(|err| Error::InvalidConfig {
            reason: err.to_string(),
        })?;

        config.erasure.validate(config.disks.len())?;
        Ok(config)
    }
}

/// Quorum thresholds applied on top of the strict majority rule
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ErasureConfig {
    /// minimum number of disks that must agree on a successful read
    pub read_quorum: usize,
    /// minimum number of disks that must agree on a successful write
    pub write_quorum: usize,
    /// deadline for every single disk call. A disk that misses it is counted as [`FailureKind::DiskTimeout`]
    pub disk_timeout_ms: u64,
}

impl ErasureConfig {
    /// Read quorum of N/2 and write quorum of N/2 + 1
    pub fn for_disks(n_disks: usize) -> Self {
        Self {
            read_quorum: (n_disks / 2).max(1),
            write_quorum: n_disks / 2 + 1,
            disk_timeout_ms: 1000,
        }
    }

    pub fn validate(&self, n_disks: usize) -> Result<()> {
        if n_disks == 0 {
            return Err(Error::InvalidConfig {
                reason: "an erasure set needs at least one disk".to_string(),
            });
        }

        if self.read_quorum == 0 || self.read_quorum > n_disks {
            return Err(Error::InvalidConfig {
                reason: format!(
                    "read_quorum ({}) must be between 1 and the number of disks ({})",
                    self.read_quorum, n_disks
                ),
            });
        }

        if self.write_quorum <= n_disks / 2 || self.write_quorum > n_disks {
            return Err(Error::InvalidConfig {
                reason: format!(
                    "write_quorum ({}) must be a strict majority of the number of disks ({})",
                    self.write_quorum, n_disks
                ),
            });
        }

        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskConfig {
    InMemory {
        capacity: Option<u64>,
        /// fault injected from the start, every call to this disk fails with it
        fault: Option<FailureKind>,
    },
    /// A slot whose disk is missing. Every call is answered with [`FailureKind::DiskNotFound`]
    Offline,
}
