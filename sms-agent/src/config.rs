// SPDX-License-Identifier: GPL-3.0-only

//! Agent configuration (`/etc/sms-agent/agent.toml`).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AgentError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/sms-agent/agent.toml";

const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 1000,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Devices the agent must never report. Entries match as substrings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BlacklistConfig {
    pub wwids: Vec<String>,
    pub paths: Vec<String>,
}

impl BlacklistConfig {
    pub fn is_blacklisted(&self, name: &str) -> bool {
        self.wwids
            .iter()
            .chain(&self.paths)
            .any(|entry| !entry.is_empty() && name.contains(entry.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub mapper_dir: PathBuf,
    /// Name prefix every agent-managed linear/striped volume carries.
    pub linear_name_prefix: String,
    pub minimal_disk_size_bytes: u64,
    pub command_timeout_secs: u64,
    pub pr_timeout_secs: u64,
    /// `-v` level passed to mpathpersist.
    pub mpath_log_level: u8,
    pub stale_read_backoff_ms: u64,
    pub batch_retry: RetryConfig,
    pub blacklist: BlacklistConfig,
    pub nvme_enabled: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            mapper_dir: PathBuf::from("/dev/mapper"),
            linear_name_prefix: "lvid-".to_string(),
            minimal_disk_size_bytes: 210 * GIB,
            command_timeout_secs: 5,
            pr_timeout_secs: 5,
            mpath_log_level: 2,
            stale_read_backoff_ms: 1000,
            batch_retry: RetryConfig::default(),
            blacklist: BlacklistConfig::default(),
            nvme_enabled: true,
        }
    }
}

impl AgentConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn pr_timeout(&self) -> Duration {
        Duration::from_secs(self.pr_timeout_secs)
    }

    pub fn stale_read_backoff(&self) -> Duration {
        Duration::from_millis(self.stale_read_backoff_ms)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| AgentError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(raw) => {
                let config = Self::from_toml_str(&raw)
                    .map_err(|e| AgentError::Config(format!("{}: {e}", path.display())))?;
                info!(path = %path.display(), "loaded agent configuration");
                Ok(config)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no configuration file, using defaults");
                Ok(Self::default())
            }
            Err(err) => Err(AgentError::Config(format!(
                "failed to read {}: {err}",
                path.display()
            ))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.linear_name_prefix.is_empty() {
            return Err(AgentError::Config(
                "linear_name_prefix must not be empty".to_string(),
            ));
        }
        if self.command_timeout_secs == 0 || self.pr_timeout_secs == 0 {
            return Err(AgentError::Config(
                "command timeouts must be non-zero".to_string(),
            ));
        }
        if self.batch_retry.attempts == 0 {
            return Err(AgentError::Config(
                "batch_retry.attempts must be at least 1".to_string(),
            ));
        }
        if self.mapper_dir.as_os_str().is_empty() {
            return Err(AgentError::Config("mapper_dir must not be empty".to_string()));
        }
        Ok(())
    }
}
