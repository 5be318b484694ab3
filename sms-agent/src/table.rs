// SPDX-License-Identifier: GPL-3.0-only

//! Device-mapper table codec.
//!
//! Reads the line-oriented form printed by `dmsetup table` (optionally
//! prefixed with `<name>:`), the `--concise` listing form, and writes tables
//! back in the form `dmsetup create` accepts.

use std::collections::BTreeMap;

use sms_types::{
    Device, DeviceChild, DeviceTarget, DeviceType, LinearTarget, MultipathArgs, MultipathTarget,
    StripedArgs, StripedTarget, TableExtent, TargetArgs, TargetRef,
};

use crate::error::{AgentError, Result};

pub const MAPPER_PREFIX: &str = "/dev/mapper/";

/// Sectors reserved at the head of every linear child.
pub const LINEAR_CHILD_OFFSET_SECTORS: u64 = 8192;

pub const STRIPE_CHUNK_BYTES: u64 = 128 * 1024;

fn parse_u64(token: &str, what: &str, line: &str) -> Result<u64> {
    token
        .parse()
        .map_err(|_| AgentError::Parse(format!("invalid {what} '{token}' in '{line}'")))
}

fn target_ref(device: &str, start: &str, line: &str) -> Result<TargetRef> {
    let device = device.strip_prefix(MAPPER_PREFIX).unwrap_or(device);
    Ok(TargetRef::new(device, parse_u64(start, "target start sector", line)?))
}

/// Tokens that look like `major:minor` device numbers.
fn is_dev_number(token: &str) -> bool {
    token
        .split_once(':')
        .is_some_and(|(major, minor)| {
            !major.is_empty()
                && !minor.is_empty()
                && major.bytes().all(|b| b.is_ascii_digit())
                && minor.bytes().all(|b| b.is_ascii_digit())
        })
}

/// Parse one table row: `[name:] start num_sectors target_type args...`.
pub fn parse_extent(line: &str) -> Result<(TableExtent, DeviceType)> {
    let mut tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.first().is_some_and(|token| token.ends_with(':')) {
        tokens.remove(0);
    }
    if tokens.len() < 3 {
        return Err(AgentError::Parse(format!(
            "table line needs at least 3 fields, got {}: '{line}'",
            tokens.len()
        )));
    }

    let logical_start_sector = parse_u64(tokens[0], "start sector", line)?;
    let num_sectors = parse_u64(tokens[1], "sector count", line)?;
    let device_type = DeviceType::from_target_name(tokens[2]);
    let args = &tokens[3..];

    let args = match device_type {
        DeviceType::Linear => {
            if args.len() != 2 {
                return Err(AgentError::Parse(format!(
                    "linear target expects 2 args, got {}: '{line}'",
                    args.len()
                )));
            }
            TargetArgs::Linear(target_ref(args[0], args[1], line)?)
        }
        DeviceType::Striped => {
            if args.len() < 2 {
                return Err(AgentError::Parse(format!(
                    "striped target expects stripe count and chunk size: '{line}'"
                )));
            }
            let num_stripes = parse_u64(args[0], "stripe count", line)?;
            let chunk_size_sectors = parse_u64(args[1], "chunk size", line)?;
            let pairs = &args[2..];
            let expected = num_stripes.saturating_mul(2);
            if pairs.len() as u64 != expected {
                return Err(AgentError::Parse(format!(
                    "striped target with {num_stripes} stripes expects {expected} target args, got {}: '{line}'",
                    pairs.len()
                )));
            }
            let targets = pairs
                .chunks(2)
                .map(|pair| target_ref(pair[0], pair[1], line))
                .collect::<Result<Vec<_>>>()?;
            TargetArgs::Striped(StripedArgs {
                num_stripes: targets.len() as u32,
                chunk_size_sectors,
                targets,
            })
        }
        DeviceType::Multipath => {
            let paths: Vec<String> = args
                .iter()
                .filter(|token| is_dev_number(token))
                .map(|token| token.to_string())
                .collect();
            TargetArgs::Multipath(MultipathArgs {
                path_count: paths.len() as u32,
                paths,
            })
        }
        DeviceType::Mirror | DeviceType::Unknown => {
            return Err(AgentError::Parse(format!(
                "unsupported target type '{}' in '{line}'",
                tokens[2]
            )));
        }
    };

    Ok((
        TableExtent {
            logical_start_sector,
            num_sectors,
            args,
        },
        device_type,
    ))
}

/// Parse the rows of one device's table.
pub fn parse_named_table<S: AsRef<str>>(name: &str, lines: &[S]) -> Result<Device> {
    let mut extents = Vec::new();
    let mut device_type = None;

    for line in lines.iter().map(AsRef::as_ref) {
        if line.trim().is_empty() {
            continue;
        }
        let (extent, line_type) = parse_extent(line)?;
        match device_type {
            None => device_type = Some(line_type),
            Some(previous) if previous != line_type => {
                return Err(AgentError::Parse(format!(
                    "device {name} mixes target types: previous {previous}, current {line_type}"
                )));
            }
            Some(_) => {}
        }
        extents.push(extent);
    }

    let target = match device_type {
        None => {
            return Err(AgentError::Parse(format!(
                "failed to parse device {name}: table is empty"
            )));
        }
        Some(DeviceType::Linear) => DeviceTarget::Linear(LinearTarget { extents }),
        Some(DeviceType::Striped) => DeviceTarget::Striped(StripedTarget { extents }),
        Some(DeviceType::Multipath) => {
            let mut extents = extents.into_iter();
            let (Some(extent), None) = (extents.next(), extents.next()) else {
                return Err(AgentError::Parse(format!(
                    "multipath device {name} must have exactly one table row"
                )));
            };
            DeviceTarget::Multipath(MultipathTarget::from_extent(extent))
        }
        Some(other) => {
            return Err(AgentError::Parse(format!(
                "unsupported target type {other} for {name}"
            )));
        }
    };

    Ok(Device::new(name, target)?)
}

/// Parse `dmsetup table` output where each row is prefixed with `<name>:`.
pub fn parse_table(text: &str) -> Result<Device> {
    let lines: Vec<&str> = text.lines().filter(|line| !line.trim().is_empty()).collect();
    let first = lines
        .first()
        .ok_or_else(|| AgentError::Parse("table is empty".to_string()))?;
    let name = first
        .split_whitespace()
        .next()
        .and_then(|token| token.strip_suffix(':'))
        .filter(|name| !name.is_empty())
        .ok_or_else(|| AgentError::Parse(format!("missing device name in '{first}'")))?;
    parse_named_table(name, &lines)
}

/// One record of `dmsetup table --concise`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConciseRecord {
    pub uuid: String,
    pub minor: String,
    pub flags: String,
    pub device: Device,
}

/// Parse `name,uuid,minor,flags,<row>[,<row>...]`.
pub fn parse_concise_record(record: &str) -> Result<ConciseRecord> {
    let items: Vec<&str> = record.trim().split(',').collect();
    if items.len() < 5 {
        return Err(AgentError::Parse(format!(
            "concise record needs name, uuid, minor, flags and a table row: '{record}'"
        )));
    }
    let device = parse_named_table(items[0], &items[4..])?;
    Ok(ConciseRecord {
        uuid: items[1].to_string(),
        minor: items[2].to_string(),
        flags: items[3].to_string(),
        device,
    })
}

/// Split a concise listing into its `;`-separated records.
pub fn concise_records(listing: &str) -> impl Iterator<Item = &str> {
    listing
        .split(';')
        .map(str::trim)
        .filter(|record| !record.is_empty())
}

fn device_token(device: &str) -> String {
    if device.contains('/') || device.contains(':') {
        device.to_string()
    } else {
        format!("{MAPPER_PREFIX}{device}")
    }
}

fn serialize_extent(extent: &TableExtent) -> Result<String> {
    let head = format!("{} {}", extent.logical_start_sector, extent.num_sectors);
    match &extent.args {
        TargetArgs::Linear(target) => Ok(format!(
            "{head} linear {} {}",
            device_token(&target.device),
            target.start_sector
        )),
        TargetArgs::Striped(args) => {
            let mut line = format!(
                "{head} striped {} {}",
                args.targets.len(),
                args.chunk_size_sectors
            );
            for target in &args.targets {
                line.push_str(&format!(
                    " {} {}",
                    device_token(&target.device),
                    target.start_sector
                ));
            }
            Ok(line)
        }
        TargetArgs::Multipath(_) => Err(AgentError::Unsupported(
            "multipath tables cannot be serialized".to_string(),
        )),
    }
}

/// Render a linear or striped device as `dmsetup create` input.
pub fn serialize(device: &Device) -> Result<String> {
    match &device.target {
        DeviceTarget::Multipath(_) => Err(AgentError::Unsupported(format!(
            "cannot serialize multipath device {}",
            device.name
        ))),
        DeviceTarget::Linear(_) | DeviceTarget::Striped(_) => {
            let lines = device
                .extents()
                .iter()
                .map(serialize_extent)
                .collect::<Result<Vec<_>>>()?;
            Ok(lines.join("\n"))
        }
    }
}

/// Table validity: across all extent boundaries the lowest and highest
/// values appear once and every other value exactly twice, so the extents
/// tile one contiguous range without gaps or overlaps.
pub fn validate(device: &Device) -> bool {
    let extents = device.extents();
    if extents.is_empty() || extents.iter().any(|extent| extent.num_sectors == 0) {
        return false;
    }

    let mut counts: BTreeMap<u64, u32> = BTreeMap::new();
    for extent in extents {
        *counts.entry(extent.logical_start_sector).or_default() += 1;
        *counts.entry(extent.end_sector()).or_default() += 1;
    }

    let (Some((&min, _)), Some((&max, _))) = (counts.first_key_value(), counts.last_key_value())
    else {
        return false;
    };
    counts.iter().all(|(&boundary, &count)| {
        if boundary == min || boundary == max {
            count == 1
        } else {
            count == 2
        }
    })
}

pub fn ensure_valid(device: &Device) -> Result<()> {
    if validate(device) {
        Ok(())
    } else {
        Err(AgentError::Validation(format!(
            "table of {} does not cover a contiguous sector range",
            device.name
        )))
    }
}

fn common_sector_size(children: &[DeviceChild]) -> Result<u32> {
    let first = children
        .first()
        .ok_or_else(|| AgentError::Validation("no child devices given".to_string()))?;
    if let Some(other) = children.iter().find(|c| c.sector_size != first.sector_size) {
        return Err(AgentError::Validation(format!(
            "sector size not equal: {} has {}, {} has {}",
            first.id, first.sector_size, other.id, other.sector_size
        )));
    }
    Ok(first.sector_size)
}

/// Concatenate children, each mapped from sector 8192 onward.
pub fn linear_table(name: &str, children: &[DeviceChild]) -> Result<Device> {
    let sector_size = common_sector_size(children)?;
    let mut extents = Vec::with_capacity(children.len());
    let mut next_start = 0;
    for child in children {
        if child.sectors <= LINEAR_CHILD_OFFSET_SECTORS {
            return Err(AgentError::Validation(format!(
                "child {} has {} sectors, no room past the {LINEAR_CHILD_OFFSET_SECTORS} sector offset",
                child.id, child.sectors
            )));
        }
        let num_sectors = child.sectors - LINEAR_CHILD_OFFSET_SECTORS;
        extents.push(TableExtent::linear(
            next_start,
            num_sectors,
            child.id.clone(),
            LINEAR_CHILD_OFFSET_SECTORS,
        ));
        next_start += num_sectors;
    }

    let mut device = Device::new(name, DeviceTarget::Linear(LinearTarget { extents }))?;
    device.sector_size = sector_size;
    Ok(device)
}

/// Stripe across children with a 128 KiB chunk.
pub fn striped_table(name: &str, children: &[DeviceChild]) -> Result<Device> {
    let sector_size = common_sector_size(children)?;
    if sector_size == 0 {
        return Err(AgentError::Validation(
            "children report a zero sector size".to_string(),
        ));
    }
    let chunk_size_sectors = STRIPE_CHUNK_BYTES / u64::from(sector_size);
    let total: u64 = children.iter().map(|child| child.sectors).sum();
    let targets = children
        .iter()
        .map(|child| TargetRef::new(child.id.clone(), 0))
        .collect();

    let extent = TableExtent::striped(0, total, chunk_size_sectors, targets);
    let mut device = Device::new(
        name,
        DeviceTarget::Striped(StripedTarget {
            extents: vec![extent],
        }),
    )?;
    device.sector_size = sector_size;
    Ok(device)
}
