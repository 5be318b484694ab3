// SPDX-License-Identifier: GPL-3.0-only

//! The agent context: everything built once at startup and shared by
//! reference afterwards.

use std::sync::Arc;

use sms_contracts::CommandRunner;
use sms_sys::Dmsetup;
use sms_types::{Device, DeviceChild, DeviceType, ReservationState, SECTOR_BYTES};
use tracing::info;

use crate::assembler::Assembler;
use crate::capabilities::SystemCapabilityProvider;
use crate::config::AgentConfig;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::handler::RequestHandler;
use crate::locks::VolumeLocks;
use crate::mapper::VolumeMapper;
use crate::query::DeviceQuery;
use crate::reservation::{
    BackendSelector, DeviceLocator, NvmeBackend, PathProbe, ReservationProtocol, ScsiBackend,
};

pub struct Agent {
    config: AgentConfig,
    runner: Arc<dyn CommandRunner>,
    locks: VolumeLocks,
    backends: Arc<BackendSelector>,
    provider: SystemCapabilityProvider,
    dispatcher: Dispatcher,
}

impl Agent {
    /// Wire the agent around `runner`. The NVMe backend is used only when
    /// enabled in `config` and the `nvme` tool is installed.
    pub fn new(config: AgentConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let nvme_enabled = config.nvme_enabled && sms_sys::nvme::nvme_cli_available();
        Self::with_nvme(config, runner, nvme_enabled)
    }

    pub fn with_nvme(config: AgentConfig, runner: Arc<dyn CommandRunner>, nvme_enabled: bool) -> Self {
        let backends = Arc::new(BackendSelector::new(
            runner.clone(),
            ScsiBackend::new(runner.clone(), config.pr_timeout(), config.mpath_log_level),
            NvmeBackend::new(runner.clone(), config.pr_timeout()),
            nvme_enabled,
            config.command_timeout(),
        ));
        let provider = SystemCapabilityProvider::new(
            runner.clone(),
            backends.clone(),
            config.mapper_dir.clone(),
            config.command_timeout(),
            config.pr_timeout(),
            config.stale_read_backoff(),
        );
        let dispatcher = Dispatcher::new(
            runner.clone(),
            backends.clone(),
            DeviceLocator::new(config.mapper_dir.clone()),
            PathProbe::new(runner.clone(), config.pr_timeout()),
            config.command_timeout(),
            config.stale_read_backoff(),
            config.batch_retry.clone(),
        );
        info!(
            mapper_dir = %config.mapper_dir.display(),
            nvme_enabled = backends.nvme_enabled(),
            "agent initialised"
        );
        Self {
            config,
            runner,
            locks: VolumeLocks::new(),
            backends,
            provider,
            dispatcher,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn locks(&self) -> &VolumeLocks {
        &self.locks
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    fn dmsetup(&self) -> Dmsetup<'_> {
        Dmsetup::new(self.runner.as_ref(), self.config.command_timeout())
    }

    pub fn query(&self) -> DeviceQuery<'_> {
        DeviceQuery::new(
            self.dmsetup(),
            Assembler::new(
                &self.provider,
                &self.config.linear_name_prefix,
                self.config.minimal_disk_size_bytes,
            ),
            &self.config.blacklist,
        )
    }

    pub fn mapper(&self) -> VolumeMapper<'_> {
        VolumeMapper::new(self.dmsetup(), &self.locks)
    }

    pub fn handler(&self) -> RequestHandler<'_> {
        RequestHandler::new(&self.dispatcher)
    }

    pub async fn list_devices(&self, target: Option<DeviceType>) -> Result<Vec<Device>> {
        self.query().list(target).await
    }

    pub async fn get_device(&self, name: &str) -> Result<Device> {
        self.query().get(name).await
    }

    /// Current registrations and reservation of one LUN.
    pub async fn reservation_state(&self, volume_id: &str) -> Result<ReservationState> {
        let device_path = DeviceLocator::new(self.config.mapper_dir.clone()).resolve(volume_id)?;
        let backend = self.backends.for_volume(volume_id).await;
        ReservationProtocol::new(backend, self.config.stale_read_backoff())
            .read_state(&device_path)
            .await
    }

    /// Geometry of physical volumes to build a composite volume from.
    pub async fn describe_children(&self, ids: &[String]) -> Result<Vec<DeviceChild>> {
        let mut children = Vec::with_capacity(ids.len());
        for id in ids {
            let device_path = DeviceLocator::new(self.config.mapper_dir.clone()).resolve(id)?;
            let timeout = self.config.command_timeout();
            let sector_size =
                sms_sys::blockdev::sector_size(self.runner.as_ref(), &device_path, timeout).await?;
            let size = sms_sys::blockdev::size_bytes(self.runner.as_ref(), &device_path, timeout).await?;
            children.push(DeviceChild {
                id: id.clone(),
                sector_size,
                sectors: size / SECTOR_BYTES,
            });
        }
        Ok(children)
    }
}
