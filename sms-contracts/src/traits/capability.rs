// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use sms_types::{FsType, PrSupport};

use crate::CommandError;

/// What `multipathd` reports for one multipath map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MultipathTopology {
    /// Name under `/dev/mapper` (`pv-<wwid>` when such a node exists).
    pub alias: String,
    pub wwid: String,
    pub vendor: String,
    pub product: String,
    /// Live sub-paths, failed ones excluded.
    pub paths: Vec<String>,
}

impl MultipathTopology {
    pub fn path_count(&self) -> u32 {
        self.paths.len() as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FilesystemUsage {
    pub fs_type: FsType,
    /// Bytes.
    pub size: u64,
    /// Bytes.
    pub used: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("malformed {what} output: {output}")]
    Malformed { what: &'static str, output: String },

    #[error("device not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Unavailable(String),
}

/// Facts about a device the assembler needs beyond its dm table.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    async fn multipath_topology(&self, name: &str) -> Result<MultipathTopology, ProviderError>;

    async fn filesystem_usage(
        &self,
        name: &str,
        size_bytes: u64,
    ) -> Result<FilesystemUsage, ProviderError>;

    async fn sector_size(&self, name: &str) -> Result<u32, ProviderError>;

    async fn pr_support(&self, name: &str) -> Result<PrSupport, ProviderError>;

    async fn serial_number(&self, name: &str) -> Result<String, ProviderError>;
}
