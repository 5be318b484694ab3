// SPDX-License-Identifier: GPL-3.0-only

//! [`CapabilityProvider`] backed by the host's storage tools.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sms_contracts::{
    CapabilityProvider, CommandRunner, FilesystemUsage, MultipathTopology, ProviderError,
};
use sms_sys::{blockdev, fs_usage, multipath, sg_persist};
use sms_types::PrSupport;
use tracing::debug;

use crate::reservation::{pr_support_summary, BackendSelector, ReservationProtocol};

pub struct SystemCapabilityProvider {
    runner: Arc<dyn CommandRunner>,
    backends: Arc<BackendSelector>,
    mapper_dir: PathBuf,
    timeout: Duration,
    pr_timeout: Duration,
    stale_read_backoff: Duration,
}

impl SystemCapabilityProvider {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        backends: Arc<BackendSelector>,
        mapper_dir: impl Into<PathBuf>,
        timeout: Duration,
        pr_timeout: Duration,
        stale_read_backoff: Duration,
    ) -> Self {
        Self {
            runner,
            backends,
            mapper_dir: mapper_dir.into(),
            timeout,
            pr_timeout,
            stale_read_backoff,
        }
    }

    fn device_path(&self, name: &str) -> String {
        self.mapper_dir.join(name).to_string_lossy().into_owned()
    }
}

#[async_trait]
impl CapabilityProvider for SystemCapabilityProvider {
    async fn multipath_topology(&self, name: &str) -> Result<MultipathTopology, ProviderError> {
        Ok(multipath::topology(self.runner.as_ref(), &self.mapper_dir, name, self.timeout).await?)
    }

    async fn filesystem_usage(
        &self,
        name: &str,
        size_bytes: u64,
    ) -> Result<FilesystemUsage, ProviderError> {
        let device_path = self.device_path(name);
        Ok(fs_usage::filesystem_usage(
            self.runner.as_ref(),
            &device_path,
            name,
            size_bytes,
            self.timeout,
        )
        .await?)
    }

    async fn sector_size(&self, name: &str) -> Result<u32, ProviderError> {
        let device_path = self.device_path(name);
        Ok(blockdev::sector_size(self.runner.as_ref(), &device_path, self.timeout).await?)
    }

    /// Capability report and current holder; either half may be missing.
    async fn pr_support(&self, name: &str) -> Result<PrSupport, ProviderError> {
        let device_path = self.device_path(name);

        let capabilities =
            match sg_persist::report_capabilities(self.runner.as_ref(), &device_path, self.pr_timeout)
                .await
            {
                Ok(capabilities) => Some(capabilities),
                Err(err) => {
                    debug!(name, error = %err, "no PR capability report");
                    None
                }
            };

        let backend = self.backends.for_volume(name).await;
        let protocol = ReservationProtocol::new(backend, self.stale_read_backoff);
        let state = match protocol.read_state(&device_path).await {
            Ok(state) => Some(state),
            Err(err) => {
                debug!(name, error = %err, "no reservation state");
                None
            }
        };

        Ok(pr_support_summary(capabilities.as_ref(), state.as_ref()))
    }

    async fn serial_number(&self, name: &str) -> Result<String, ProviderError> {
        let device_path = self.device_path(name);
        Ok(blockdev::serial_number(self.runner.as_ref(), &device_path, self.timeout).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reservation::{NvmeBackend, ScsiBackend};
    use crate::testing::ScriptedRunner;
    use sms_types::RegistrationKey;

    fn provider(runner: Arc<ScriptedRunner>) -> SystemCapabilityProvider {
        let timeout = Duration::from_secs(5);
        let backends = BackendSelector::new(
            runner.clone(),
            ScsiBackend::new(runner.clone(), timeout, 2),
            NvmeBackend::new(runner.clone(), timeout),
            false,
            timeout,
        );
        SystemCapabilityProvider::new(
            runner,
            Arc::new(backends),
            "/dev/mapper",
            timeout,
            timeout,
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn pr_support_combines_capabilities_and_holder() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on(
                    "sg_persist -c --in /dev/mapper/pv-36e00084100ee7ec9",
                    "    Write Exclusive, all registrants: 1\n    Persist Through Power Loss Capable(PTPL_C): 1\n",
                )
                .on(
                    "mpathpersist -v 2 --in -k",
                    "  PR generation=0x6e, 2 registered reservation keys follow:\n    0xc6134001\n    0xc6134001\n",
                )
                .on(
                    "mpathpersist -v 2 --in -r",
                    "  PR generation=0x6e, Reservation follows:\n    Key = 0x0\n    scope = LU_SCOPE, type = Write Exclusive, all registrants\n",
                ),
        );

        let support = provider(runner)
            .pr_support("pv-36e00084100ee7ec9")
            .await
            .unwrap();
        assert!(support.wear_supported);
        assert_eq!(support.held_key, Some(RegistrationKey::new(0xc6134001)));
    }

    #[tokio::test]
    async fn pr_support_tolerates_missing_reports() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .fail("sg_persist", "Illegal request")
                .fail("mpathpersist", "Illegal request"),
        );
        let support = provider(runner).pr_support("lvid-1").await.unwrap();
        assert_eq!(support, PrSupport::default());
    }

    #[tokio::test]
    async fn sector_size_reads_mapper_node() {
        let runner = Arc::new(ScriptedRunner::new().on("blockdev --getss /dev/mapper/lvid-1", "4096\n"));
        assert_eq!(provider(runner.clone()).sector_size("lvid-1").await.unwrap(), 4096);
        assert_eq!(runner.calls(), vec!["blockdev --getss /dev/mapper/lvid-1".to_string()]);
    }
}
