// SPDX-License-Identifier: GPL-3.0-only

//! Path-level checks that do not depend on the reservation backend.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sms_contracts::{CommandLine, CommandRunner};
use sms_sys::multipath::{self, VOLUME_ALIAS_PREFIX};
use tracing::{debug, warn};

use crate::error::{AgentError, Result};

/// Maps a volume id to its node under the mapper directory.
#[derive(Debug, Clone)]
pub struct DeviceLocator {
    mapper_dir: PathBuf,
}

impl DeviceLocator {
    pub fn new(mapper_dir: impl Into<PathBuf>) -> Self {
        Self {
            mapper_dir: mapper_dir.into(),
        }
    }

    /// `<mapper>/<id>`, falling back to `<mapper>/pv-<id>`.
    pub fn resolve(&self, volume_id: &str) -> Result<String> {
        let direct = self.mapper_dir.join(volume_id);
        if direct.exists() {
            return Ok(direct.to_string_lossy().into_owned());
        }
        let aliased = self
            .mapper_dir
            .join(format!("{VOLUME_ALIAS_PREFIX}{volume_id}"));
        if aliased.exists() {
            return Ok(aliased.to_string_lossy().into_owned());
        }
        Err(AgentError::DeviceNotFound(format!(
            "{volume_id} (looked in {})",
            self.mapper_dir.display()
        )))
    }
}

pub struct PathProbe {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl PathProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    pub fn write_probe_command(device_path: &str) -> CommandLine {
        CommandLine::new("dd").args([
            "if=/dev/zero".to_string(),
            format!("of={device_path}"),
            "seek=512".to_string(),
            "bs=512".to_string(),
            "count=1".to_string(),
            "oflag=direct".to_string(),
        ])
    }

    pub async fn path_count(&self, device_path: &str) -> Result<u32> {
        let count = multipath::path_count(self.runner.as_ref(), device_path, self.timeout).await?;
        debug!(device_path, count, "counted live paths");
        Ok(count)
    }

    /// One direct-I/O sector write must succeed.
    pub async fn can_write(&self, device_path: &str) -> Result<()> {
        self.runner
            .run(&Self::write_probe_command(device_path), self.timeout)
            .await?;
        Ok(())
    }

    /// One direct-I/O sector write must be rejected, as it is for a node
    /// fenced off by another holder's reservation.
    pub async fn cannot_write(&self, device_path: &str) -> Result<()> {
        match self
            .runner
            .run(&Self::write_probe_command(device_path), self.timeout)
            .await
        {
            Ok(_) => Err(AgentError::Validation(format!(
                "write to {device_path} succeeded but was expected to be fenced"
            ))),
            Err(err) if err.is_timeout() => Err(err.into()),
            Err(err) => {
                warn!(device_path, error = %err, "write rejected as expected");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::testing::ScriptedRunner;

    fn mapper_dir(tag: &str, nodes: &[&str]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sms-agent-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        for node in nodes {
            fs::write(dir.join(node), b"").unwrap();
        }
        dir
    }

    #[test]
    fn resolves_direct_then_aliased_name() {
        let dir = mapper_dir("locator", &["lvid-7", "pv-36e00084100ee7ec9"]);
        let locator = DeviceLocator::new(&dir);

        assert_eq!(
            locator.resolve("lvid-7").unwrap(),
            dir.join("lvid-7").to_string_lossy()
        );
        assert_eq!(
            locator.resolve("36e00084100ee7ec9").unwrap(),
            dir.join("pv-36e00084100ee7ec9").to_string_lossy()
        );
        assert!(matches!(
            locator.resolve("36e0000000000000"),
            Err(AgentError::DeviceNotFound(_))
        ));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn counts_live_paths() {
        let runner = Arc::new(ScriptedRunner::new().on(
            "multipath -ll",
            "36e00084100ee7ec9 dm-3 HUAWEI ,XSG1
size=1.0T features='0' hwhandler='0' wp=rw
`-+- policy='service-time 0' prio=1 status=active
  |- 1:0:0:1 sdb 8:16 active ready running
  |- 2:0:0:1 sdc 8:32 failed faulty running
  `- 3:0:0:1 sdd 8:48 active ready running",
        ));
        let probe = PathProbe::new(runner, Duration::from_secs(5));
        assert_eq!(probe.path_count("/dev/mapper/pv-36e00084100ee7ec9").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn write_probes_are_inverse() {
        let dev = "/dev/mapper/pv-36e00084100ee7ec9";

        let open = PathProbe::new(Arc::new(ScriptedRunner::new()), Duration::from_secs(5));
        assert!(open.can_write(dev).await.is_ok());
        assert!(matches!(open.cannot_write(dev).await, Err(AgentError::Validation(_))));

        let fenced = PathProbe::new(
            Arc::new(ScriptedRunner::new().fail("dd", "dd: error writing: Invalid exchange")),
            Duration::from_secs(5),
        );
        assert!(matches!(fenced.can_write(dev).await, Err(AgentError::CommandExec(_))));
        assert!(fenced.cannot_write(dev).await.is_ok());
    }

    #[test]
    fn probe_writes_one_direct_sector() {
        assert_eq!(
            PathProbe::write_probe_command("/dev/mapper/x").to_string(),
            "dd if=/dev/zero of=/dev/mapper/x seek=512 bs=512 count=1 oflag=direct"
        );
    }
}
