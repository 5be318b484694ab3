// SPDX-License-Identifier: GPL-3.0-only

//! Device-mapper table and device models.
//!
//! A dm table is a list of rows of the form
//! `logical_start_sector num_sectors target_type target_args`. The agent only
//! builds `linear` and `striped` tables; `multipath` tables are read.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::reservation::RegistrationKey;

/// Size of a device-mapper table sector in bytes.
pub const SECTOR_BYTES: u64 = 512;

/// Target type of a device-mapper table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    #[default]
    Unknown,
    Linear,
    Striped,
    Mirror,
    Multipath,
}

impl DeviceType {
    /// Map a dm target name to a device type. Unrecognised names are `Unknown`.
    pub fn from_target_name(name: &str) -> Self {
        match name {
            "linear" => Self::Linear,
            "striped" => Self::Striped,
            "mirror" => Self::Mirror,
            "multipath" => Self::Multipath,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Linear => "linear",
            Self::Striped => "striped",
            Self::Mirror => "mirror",
            Self::Multipath => "multipath",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(device, start_sector)` pair referenced by a linear or striped row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    /// Mapper name (`/dev/mapper/` stripped) or the verbatim token
    /// (`8:2`, `/dev/loop0`) when it is not a mapper path.
    pub device: String,
    pub start_sector: u64,
}

impl TargetRef {
    pub fn new(device: impl Into<String>, start_sector: u64) -> Self {
        Self {
            device: device.into(),
            start_sector,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripedArgs {
    pub num_stripes: u32,
    pub chunk_size_sectors: u64,
    pub targets: Vec<TargetRef>,
}

/// Descriptive only; multipath tables are never constructed by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MultipathArgs {
    pub path_count: u32,
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TargetArgs {
    Linear(TargetRef),
    Striped(StripedArgs),
    Multipath(MultipathArgs),
}

impl TargetArgs {
    pub fn device_type(&self) -> DeviceType {
        match self {
            Self::Linear(_) => DeviceType::Linear,
            Self::Striped(_) => DeviceType::Striped,
            Self::Multipath(_) => DeviceType::Multipath,
        }
    }
}

/// One row of a device-mapper table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableExtent {
    pub logical_start_sector: u64,
    pub num_sectors: u64,
    pub args: TargetArgs,
}

impl TableExtent {
    pub fn linear(start: u64, num_sectors: u64, device: impl Into<String>, offset: u64) -> Self {
        Self {
            logical_start_sector: start,
            num_sectors,
            args: TargetArgs::Linear(TargetRef::new(device, offset)),
        }
    }

    pub fn striped(
        start: u64,
        num_sectors: u64,
        chunk_size_sectors: u64,
        targets: Vec<TargetRef>,
    ) -> Self {
        Self {
            logical_start_sector: start,
            num_sectors,
            args: TargetArgs::Striped(StripedArgs {
                num_stripes: targets.len() as u32,
                chunk_size_sectors,
                targets,
            }),
        }
    }

    /// Exclusive end of the logical range covered by this row.
    pub fn end_sector(&self) -> u64 {
        self.logical_start_sector.saturating_add(self.num_sectors)
    }

    pub fn device_type(&self) -> DeviceType {
        self.args.device_type()
    }

    /// Devices referenced by this row, in table order.
    pub fn target_devices(&self) -> Vec<&str> {
        match &self.args {
            TargetArgs::Linear(target) => vec![target.device.as_str()],
            TargetArgs::Striped(args) => args.targets.iter().map(|t| t.device.as_str()).collect(),
            TargetArgs::Multipath(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipathTarget {
    /// Volume name as exposed under `/dev/mapper` (`pv-<wwid>` or the wwid).
    pub alias: String,
    pub wwid: String,
    pub vendor: String,
    pub product: String,
    pub paths: Vec<String>,
    pub path_count: u32,
    pub extent: TableExtent,
}

impl MultipathTarget {
    pub fn from_extent(extent: TableExtent) -> Self {
        Self {
            alias: String::new(),
            wwid: String::new(),
            vendor: String::new(),
            product: String::new(),
            paths: Vec::new(),
            path_count: 0,
            extent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LinearTarget {
    pub extents: Vec<TableExtent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StripedTarget {
    pub extents: Vec<TableExtent>,
}

/// Closed set of targets a device can carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeviceTarget {
    Multipath(MultipathTarget),
    Linear(LinearTarget),
    Striped(StripedTarget),
}

impl DeviceTarget {
    pub fn device_type(&self) -> DeviceType {
        match self {
            Self::Multipath(_) => DeviceType::Multipath,
            Self::Linear(_) => DeviceType::Linear,
            Self::Striped(_) => DeviceType::Striped,
        }
    }

    pub fn extents(&self) -> &[TableExtent] {
        match self {
            Self::Multipath(target) => std::slice::from_ref(&target.extent),
            Self::Linear(target) => &target.extents,
            Self::Striped(target) => &target.extents,
        }
    }

    /// Total logical sectors. A striped target is a single row spanning all
    /// members, so its first extent carries the whole size. `None` on overflow.
    pub fn sector_count(&self) -> Option<u64> {
        match self {
            Self::Multipath(target) => Some(target.extent.num_sectors),
            Self::Linear(target) => target
                .extents
                .iter()
                .try_fold(0u64, |total, e| total.checked_add(e.num_sectors)),
            Self::Striped(target) => Some(target.extents.first().map_or(0, |e| e.num_sectors)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FsType {
    #[default]
    None,
    Ext4,
    Pfs,
}

impl FsType {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "ext4" => Self::Ext4,
            "pfs" => Self::Pfs,
            _ => Self::None,
        }
    }
}

/// Persistent-reservation capability of a device and the key currently
/// holding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PrSupport {
    /// "Write Exclusive, all registrants" is in the device's type mask.
    pub wear_supported: bool,
    /// Raw capability report, `name:value;` pairs.
    pub capabilities: String,
    pub held_key: Option<RegistrationKey>,
}

/// The assembled device descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    pub device_type: DeviceType,
    pub sector_num: u64,
    pub sector_size: u32,
    pub fs_type: FsType,
    pub fs_size: u64,
    pub used_size: u64,
    pub pr_support: PrSupport,
    pub serial_number: String,
    pub target: DeviceTarget,
}

impl Device {
    /// A bare device as read from a table, before any enrichment.
    pub fn new(name: impl Into<String>, target: DeviceTarget) -> Result<Self, TypeError> {
        let name = name.into();
        let sector_num = target
            .sector_count()
            .ok_or_else(|| TypeError::SectorOverflow(name.clone()))?;
        Ok(Self {
            name,
            device_type: target.device_type(),
            sector_num,
            sector_size: 0,
            fs_type: FsType::None,
            fs_size: 0,
            used_size: 0,
            pr_support: PrSupport::default(),
            serial_number: String::new(),
            target,
        })
    }

    pub fn extents(&self) -> &[TableExtent] {
        self.target.extents()
    }

    pub fn size_bytes(&self) -> u64 {
        u64::from(self.sector_size).saturating_mul(self.sector_num)
    }

    /// Physical devices the volume is built from. A multipath LUN is its own child.
    pub fn children(&self) -> Vec<String> {
        match &self.target {
            DeviceTarget::Multipath(_) => vec![self.name.clone()],
            DeviceTarget::Linear(_) | DeviceTarget::Striped(_) => self
                .extents()
                .iter()
                .flat_map(|extent| extent.target_devices())
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// A physical device contributing to a composite volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceChild {
    pub id: String,
    pub sector_size: u32,
    pub sectors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_new_sums_extent_sectors() {
        let device = Device::new(
            "lvid-1",
            DeviceTarget::Linear(LinearTarget {
                extents: vec![
                    TableExtent::linear(0, 100, "d0", 8),
                    TableExtent::linear(100, 150, "d1", 8),
                ],
            }),
        )
        .unwrap();

        assert_eq!(device.device_type, DeviceType::Linear);
        assert_eq!(device.sector_num, 250);
        assert_eq!(device.children(), vec!["d0", "d1"]);
    }

    #[test]
    fn striped_children_follow_stripe_order() {
        let device = Device::new(
            "lvid-2",
            DeviceTarget::Striped(StripedTarget {
                extents: vec![TableExtent::striped(
                    0,
                    4096,
                    256,
                    vec![TargetRef::new("a", 0), TargetRef::new("b", 0)],
                )],
            }),
        )
        .unwrap();

        assert_eq!(device.sector_num, 4096);
        assert_eq!(device.children(), vec!["a", "b"]);
    }

    #[test]
    fn multipath_device_is_its_own_child() {
        let extent = TableExtent {
            logical_start_sector: 0,
            num_sectors: 10,
            args: TargetArgs::Multipath(MultipathArgs::default()),
        };
        let device = Device::new(
            "36e00084100ee7ec9",
            DeviceTarget::Multipath(MultipathTarget::from_extent(extent)),
        )
        .unwrap();
        assert_eq!(device.children(), vec!["36e00084100ee7ec9"]);
    }

    #[test]
    fn oversized_linear_table_is_rejected() {
        let target = DeviceTarget::Linear(LinearTarget {
            extents: vec![
                TableExtent::linear(0, u64::MAX, "d0", 8),
                TableExtent::linear(u64::MAX, 1, "d1", 8),
            ],
        });
        assert_eq!(
            Device::new("lvid-huge", target),
            Err(TypeError::SectorOverflow("lvid-huge".to_string()))
        );
    }

    #[test]
    fn unknown_target_names_map_to_unknown() {
        assert_eq!(DeviceType::from_target_name("thin"), DeviceType::Unknown);
        assert_eq!(DeviceType::from_target_name("striped"), DeviceType::Striped);
    }
}
