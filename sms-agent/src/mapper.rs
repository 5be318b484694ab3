// SPDX-License-Identifier: GPL-3.0-only

//! Provisioning of agent-managed linear and striped volumes.

use sms_sys::Dmsetup;
use sms_types::{Device, DeviceChild, VolumeType};
use tracing::{info, warn};

use crate::error::{AgentError, Result};
use crate::locks::VolumeLocks;
use crate::table;

pub struct VolumeMapper<'a> {
    dmsetup: Dmsetup<'a>,
    locks: &'a VolumeLocks,
}

impl<'a> VolumeMapper<'a> {
    pub fn new(dmsetup: Dmsetup<'a>, locks: &'a VolumeLocks) -> Self {
        Self { dmsetup, locks }
    }

    /// Build the table for `children` and create the volume.
    pub async fn create_from_children(
        &self,
        name: &str,
        volume_type: VolumeType,
        children: &[DeviceChild],
    ) -> Result<Device> {
        let device = match volume_type {
            VolumeType::DmLinear => table::linear_table(name, children)?,
            VolumeType::DmStriped => table::striped_table(name, children)?,
            VolumeType::Multipath | VolumeType::DmMirror => {
                return Err(AgentError::Unsupported(format!(
                    "cannot provision {volume_type} volume {name}"
                )));
            }
        };
        self.create(&device).await?;
        Ok(device)
    }

    /// Create the device; an existing device of the same name is removed
    /// first.
    pub async fn create(&self, device: &Device) -> Result<()> {
        table::ensure_valid(device)?;
        let rendered = table::serialize(device)?;
        let _guard = self.locks.try_acquire(&device.name)?;

        if self.dmsetup.exists(&device.name).await? {
            warn!(name = %device.name, "device already exists, recreating");
            self.dmsetup.remove(&device.name).await?;
        }
        self.dmsetup.create(&device.name, &rendered).await?;
        info!(name = %device.name, sectors = device.sector_num, "created volume");
        Ok(())
    }

    /// Swap in a new table for an existing device.
    pub async fn reload(&self, device: &Device) -> Result<()> {
        table::ensure_valid(device)?;
        let rendered = table::serialize(device)?;
        let _guard = self.locks.try_acquire(&device.name)?;

        if !self.dmsetup.exists(&device.name).await? {
            return Err(AgentError::DeviceNotFound(device.name.clone()));
        }
        self.dmsetup.reload(&device.name, &rendered).await?;
        self.dmsetup.suspend(&device.name).await?;
        self.dmsetup.resume(&device.name).await?;
        info!(name = %device.name, sectors = device.sector_num, "reloaded volume");
        Ok(())
    }

    /// Grow an existing device in place: load the new table and resume.
    pub async fn expand(&self, device: &Device) -> Result<()> {
        table::ensure_valid(device)?;
        let rendered = table::serialize(device)?;
        let _guard = self.locks.try_acquire(&device.name)?;

        if !self.dmsetup.exists(&device.name).await? {
            return Err(AgentError::DeviceNotFound(device.name.clone()));
        }
        self.dmsetup.load(&device.name, &rendered).await?;
        self.dmsetup.resume(&device.name).await?;
        info!(name = %device.name, sectors = device.sector_num, "expanded volume");
        Ok(())
    }

    pub async fn remove(&self, name: &str) -> Result<()> {
        let _guard = self.locks.try_acquire(name)?;
        if !self.dmsetup.exists(name).await? {
            info!(name, "volume already absent");
            return Ok(());
        }
        self.dmsetup.remove(name).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::testing::ScriptedRunner;

    fn children() -> Vec<DeviceChild> {
        vec![
            DeviceChild {
                id: "pv-a".to_string(),
                sector_size: 512,
                sectors: 108192,
            },
            DeviceChild {
                id: "pv-b".to_string(),
                sectors: 208192,
                sector_size: 512,
            },
        ]
    }

    #[tokio::test]
    async fn create_feeds_serialized_table() {
        let runner = Arc::new(ScriptedRunner::new());
        let locks = VolumeLocks::new();
        let mapper = VolumeMapper::new(Dmsetup::new(runner.as_ref(), Duration::from_secs(5)), &locks);

        mapper
            .create_from_children("lvid-4", VolumeType::DmLinear, &children())
            .await
            .unwrap();

        assert!(runner.calls_matching("dmsetup remove").is_empty());
        assert_eq!(
            runner.stdin_of("dmsetup create lvid-4"),
            vec!["0 100000 linear /dev/mapper/pv-a 8192\n100000 200000 linear /dev/mapper/pv-b 8192".to_string()]
        );
        assert!(!locks.is_locked("lvid-4"));
    }

    #[tokio::test]
    async fn create_replaces_existing_device() {
        let runner = Arc::new(ScriptedRunner::new().on(
            "dmsetup table --concise lvid-4",
            "lvid-4,,7,L--w,0 100 linear /dev/mapper/pv-a 8192",
        ));
        let locks = VolumeLocks::new();
        let mapper = VolumeMapper::new(Dmsetup::new(runner.as_ref(), Duration::from_secs(5)), &locks);

        mapper
            .create_from_children("lvid-4", VolumeType::DmStriped, &children())
            .await
            .unwrap();

        let calls = runner.calls();
        assert_eq!(calls[1], "dmsetup remove -f lvid-4");
        assert_eq!(calls[2], "dmsetup create lvid-4");
    }

    #[tokio::test]
    async fn busy_volume_is_rejected() {
        let runner = Arc::new(ScriptedRunner::new());
        let locks = VolumeLocks::new();
        let mapper = VolumeMapper::new(Dmsetup::new(runner.as_ref(), Duration::from_secs(5)), &locks);

        let _held = locks.try_acquire("lvid-5").unwrap();
        assert!(matches!(mapper.remove("lvid-5").await, Err(AgentError::Busy(_))));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn reload_requires_existing_device() {
        let runner = Arc::new(ScriptedRunner::new());
        let locks = VolumeLocks::new();
        let mapper = VolumeMapper::new(Dmsetup::new(runner.as_ref(), Duration::from_secs(5)), &locks);
        let device = table::linear_table("lvid-6", &children()).unwrap();

        assert!(matches!(
            mapper.reload(&device).await,
            Err(AgentError::DeviceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn expand_loads_then_resumes() {
        let runner = Arc::new(ScriptedRunner::new().on(
            "dmsetup table --concise lvid-7",
            "lvid-7,,9,L--w,0 100000 linear /dev/mapper/pv-a 8192",
        ));
        let locks = VolumeLocks::new();
        let mapper = VolumeMapper::new(Dmsetup::new(runner.as_ref(), Duration::from_secs(5)), &locks);
        let device = table::linear_table("lvid-7", &children()).unwrap();

        mapper.expand(&device).await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls[1..], ["dmsetup load lvid-7", "dmsetup resume lvid-7"]);
        assert_eq!(
            runner.stdin_of("dmsetup load lvid-7"),
            vec!["0 100000 linear /dev/mapper/pv-a 8192\n100000 200000 linear /dev/mapper/pv-b 8192".to_string()]
        );
        assert!(!locks.is_locked("lvid-7"));
    }

    #[tokio::test]
    async fn multipath_cannot_be_provisioned() {
        let runner = Arc::new(ScriptedRunner::new());
        let locks = VolumeLocks::new();
        let mapper = VolumeMapper::new(Dmsetup::new(runner.as_ref(), Duration::from_secs(5)), &locks);
        assert!(matches!(
            mapper
                .create_from_children("pv-1", VolumeType::Multipath, &children())
                .await,
            Err(AgentError::Unsupported(_))
        ));
    }
}
