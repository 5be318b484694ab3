// SPDX-License-Identifier: GPL-3.0-only

//! Device listing and lookup over `dmsetup table --concise`.

use sms_sys::Dmsetup;
use sms_types::{Device, DeviceTarget, DeviceType};
use tracing::{debug, warn};

use crate::assembler::Assembler;
use crate::config::BlacklistConfig;
use crate::error::{AgentError, Result};
use crate::table;

pub struct DeviceQuery<'a> {
    dmsetup: Dmsetup<'a>,
    assembler: Assembler<'a>,
    blacklist: &'a BlacklistConfig,
}

fn blacklisted(blacklist: &BlacklistConfig, device: &Device) -> bool {
    if blacklist.is_blacklisted(&device.name) {
        return true;
    }
    match &device.target {
        DeviceTarget::Multipath(target) => {
            !target.wwid.is_empty() && blacklist.is_blacklisted(&target.wwid)
        }
        DeviceTarget::Linear(_) | DeviceTarget::Striped(_) => false,
    }
}

impl<'a> DeviceQuery<'a> {
    pub fn new(
        dmsetup: Dmsetup<'a>,
        assembler: Assembler<'a>,
        blacklist: &'a BlacklistConfig,
    ) -> Self {
        Self {
            dmsetup,
            assembler,
            blacklist,
        }
    }

    /// Every device of `target` type (all types when `None`). Records that
    /// fail to parse or assemble are logged and left out.
    pub async fn list(&self, target: Option<DeviceType>) -> Result<Vec<Device>> {
        let listing = self.dmsetup.table_concise(target, &[]).await?;
        let mut devices = Vec::new();
        for record in table::concise_records(&listing) {
            let parsed = match table::parse_concise_record(record) {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!(record, error = %err, "skipping unparseable table record");
                    continue;
                }
            };
            if blacklisted(self.blacklist, &parsed.device) {
                debug!(name = %parsed.device.name, "skipping blacklisted device");
                continue;
            }
            let name = parsed.device.name.clone();
            match self.assembler.assemble(parsed.device).await {
                Ok(device) if blacklisted(self.blacklist, &device) => {
                    debug!(name, "skipping blacklisted device");
                }
                Ok(device) => devices.push(device),
                Err(err) => warn!(name, error = %err, "skipping device"),
            }
        }
        debug!(count = devices.len(), "listed devices");
        Ok(devices)
    }

    /// One device by name; failures surface.
    pub async fn get(&self, name: &str) -> Result<Device> {
        let listing = self.dmsetup.table_concise(None, &[name]).await?;
        let record = table::concise_records(&listing)
            .next()
            .ok_or_else(|| AgentError::DeviceNotFound(name.to_string()))?;
        let parsed = table::parse_concise_record(record)?;
        if blacklisted(self.blacklist, &parsed.device) {
            return Err(AgentError::DeviceNotFound(format!("{name} is blacklisted")));
        }
        let device = self.assembler.assemble(parsed.device).await?;
        if blacklisted(self.blacklist, &device) {
            return Err(AgentError::DeviceNotFound(format!("{name} is blacklisted")));
        }
        Ok(device)
    }

    pub async fn children(&self, name: &str) -> Result<Vec<String>> {
        read_children(&self.dmsetup, name).await
    }
}

/// Physical children of a volume; a multipath volume is its own child.
/// Only the table is read.
pub async fn read_children(dmsetup: &Dmsetup<'_>, name: &str) -> Result<Vec<String>> {
    let listing = dmsetup.table_concise(None, &[name]).await?;
    let record = table::concise_records(&listing)
        .next()
        .ok_or_else(|| AgentError::DeviceNotFound(name.to_string()))?;
    Ok(table::parse_concise_record(record)?.device.children())
}
