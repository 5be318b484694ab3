// SPDX-License-Identifier: GPL-3.0-only

//! Turns a parsed dm table into a fully described [`Device`].

use sms_contracts::CapabilityProvider;
use sms_types::{Device, DeviceTarget, DeviceType};
use tracing::{debug, warn};

use crate::error::{AgentError, Result};
use crate::table;

pub struct Assembler<'a> {
    provider: &'a dyn CapabilityProvider,
    linear_name_prefix: &'a str,
    minimal_disk_size_bytes: u64,
}

impl<'a> Assembler<'a> {
    pub fn new(
        provider: &'a dyn CapabilityProvider,
        linear_name_prefix: &'a str,
        minimal_disk_size_bytes: u64,
    ) -> Self {
        Self {
            provider,
            linear_name_prefix,
            minimal_disk_size_bytes,
        }
    }

    pub async fn assemble(&self, mut device: Device) -> Result<Device> {
        match device.device_type {
            DeviceType::Multipath => self.describe_multipath(&mut device).await?,
            DeviceType::Linear | DeviceType::Striped => self.check_composite(&device)?,
            other @ (DeviceType::Mirror | DeviceType::Unknown) => {
                return Err(AgentError::Unsupported(format!(
                    "{other} device {}",
                    device.name
                )));
            }
        }
        device.sector_num = device.target.sector_count().ok_or_else(|| {
            AgentError::Parse(format!("sector count of {} overflows", device.name))
        })?;

        match self.provider.sector_size(&device.name).await {
            Ok(size) => device.sector_size = size,
            Err(err) => warn!(name = %device.name, error = %err, "sector size unavailable"),
        }

        match self
            .provider
            .filesystem_usage(&device.name, device.size_bytes())
            .await
        {
            Ok(usage) => {
                device.fs_type = usage.fs_type;
                device.fs_size = usage.size;
                device.used_size = usage.used;
            }
            Err(err) => debug!(name = %device.name, error = %err, "filesystem usage unavailable"),
        }

        match self.provider.pr_support(&device.name).await {
            Ok(support) => device.pr_support = support,
            Err(err) => debug!(name = %device.name, error = %err, "PR support unavailable"),
        }

        if device.size_bytes() < self.minimal_disk_size_bytes {
            return Err(AgentError::Validation(format!(
                "device {} is {} bytes, below the {} byte minimum",
                device.name,
                device.size_bytes(),
                self.minimal_disk_size_bytes
            )));
        }
        Ok(device)
    }

    async fn describe_multipath(&self, device: &mut Device) -> Result<()> {
        let topology = self.provider.multipath_topology(&device.name).await?;
        match &mut device.target {
            DeviceTarget::Multipath(target) => {
                target.path_count = topology.path_count();
                target.alias = topology.alias;
                target.wwid = topology.wwid;
                target.vendor = topology.vendor;
                target.product = topology.product;
                target.paths = topology.paths;
            }
            other => {
                return Err(AgentError::Validation(format!(
                    "device {} claims multipath but carries a {} table",
                    device.name,
                    other.device_type()
                )));
            }
        }

        match self.provider.serial_number(&device.name).await {
            Ok(serial) => device.serial_number = serial,
            Err(err) => debug!(name = %device.name, error = %err, "serial number unavailable"),
        }
        Ok(())
    }

    fn check_composite(&self, device: &Device) -> Result<()> {
        if !device.name.starts_with(self.linear_name_prefix) {
            return Err(AgentError::Validation(format!(
                "{} device {} lacks the '{}' name prefix",
                device.device_type, device.name, self.linear_name_prefix
            )));
        }
        table::ensure_valid(device)
    }
}
