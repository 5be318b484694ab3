// SPDX-License-Identifier: GPL-3.0-only

//! Multipath topology via `multipathd` and live path counting via `multipath -ll`.

use std::path::Path;
use std::time::Duration;

use sms_contracts::{CommandError, CommandLine, CommandRunner, MultipathTopology};
use tracing::debug;

use crate::dmsetup::NO_SUCH_DEVICE;
use crate::{Result, SysError};

/// Prefix of the udev alias given to physical volumes.
pub const VOLUME_ALIAS_PREFIX: &str = "pv-";

/// Whether `token` is a SCSI `H:C:T:L` address or the NVMe `#:#:#:#` placeholder.
fn is_path_address(token: &str) -> bool {
    if token == "#:#:#:#" {
        return true;
    }
    let parts: Vec<&str> = token.split(':').collect();
    parts.len() == 4
        && parts
            .iter()
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
}

/// Device name of a live path line; `None` for headers and failed paths.
fn live_path(line: &str) -> Option<&str> {
    if line.contains("failed") {
        return None;
    }
    let mut tokens = line.split_whitespace();
    tokens.find(|token| is_path_address(token))?;
    tokens.next()
}

/// Parse `multipathd show map <name> topology`.
///
/// The first line is `<alias> (<wwid>) dm-N <vendor> ,<product>` or, for maps
/// without an alias, `<wwid> dm-N <vendor> ,<product>`. The returned alias is
/// the wwid; callers resolve the `/dev/mapper` name.
pub fn parse_topology(output: &str) -> Result<MultipathTopology> {
    let mut lines = output.lines();
    let header = lines
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .ok_or_else(|| SysError::parse("multipathd topology", output))?;

    let (identity, device_info) = match header.find(" dm-") {
        Some(at) => (&header[..at], header[at + 1..].trim()),
        None => (header, ""),
    };
    let mut ids = identity.split_whitespace();
    let first = ids.next().unwrap_or_default();

    let mut topology = MultipathTopology::default();
    topology.wwid = match ids.next() {
        Some(wwid) if wwid.starts_with('(') => wwid.trim_matches(['(', ')']).to_string(),
        _ => first.to_string(),
    };
    // `dm-N <vendor> ,<product>`; either side of the comma may contain spaces.
    if let Some((_, vendor_product)) = device_info.split_once(char::is_whitespace) {
        let (vendor, product) = vendor_product.split_once(',').unwrap_or((vendor_product, ""));
        topology.vendor = vendor.trim().to_string();
        topology.product = product.trim().to_string();
    }

    topology.paths = lines.filter_map(live_path).map(str::to_string).collect();
    topology.alias = topology.wwid.clone();
    Ok(topology)
}

/// Number of live sub-paths in `multipath -ll` output.
pub fn count_live_paths(output: &str) -> u32 {
    output.lines().filter_map(live_path).count() as u32
}

/// `pv-<wwid>` when such a node exists under `mapper_dir`, else the wwid.
pub fn resolve_volume_alias(mapper_dir: &Path, wwid: &str) -> String {
    let alias = format!("{VOLUME_ALIAS_PREFIX}{wwid}");
    if mapper_dir.join(&alias).exists() {
        alias
    } else {
        wwid.to_string()
    }
}

pub async fn topology(
    runner: &dyn CommandRunner,
    mapper_dir: &Path,
    name: &str,
    timeout: Duration,
) -> Result<MultipathTopology> {
    let command = CommandLine::new("multipathd").args(["show", "map", name, "topology"]);
    let output = match runner.run(&command, timeout).await {
        Ok(output) => output.stdout,
        Err(err @ CommandError::Failed { .. }) if err.stderr().contains(NO_SUCH_DEVICE) => {
            return Err(SysError::DeviceNotFound(name.to_string()));
        }
        Err(err) => return Err(err.into()),
    };
    debug!(name, %output, "multipath topology");

    let mut topology = parse_topology(&output)?;
    if topology.paths.is_empty() {
        return Err(SysError::NoLivePaths(name.to_string()));
    }
    topology.alias = resolve_volume_alias(mapper_dir, &topology.wwid);
    Ok(topology)
}

/// `multipath -ll <device>` and count its live paths.
pub async fn path_count(
    runner: &dyn CommandRunner,
    device_path: &str,
    timeout: Duration,
) -> Result<u32> {
    let command = CommandLine::new("multipath").args(["-ll", device_path]);
    let output = runner.run(&command, timeout).await?;
    Ok(count_live_paths(&output.stdout))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALIASED: &str = "pv-360050767088081329800000000000105 (360050767088081329800000000000105) dm-5 ALIBABA ,MCS
size=300G features='1 queue_if_no_path' hwhandler='0' wp=rw
|-+- policy='round-robin 0' prio=50 status=active
| |- 14:0:1:3 sdl     8:176  active ready running
| |- 15:0:1:3 sdar    66:176 active ready running
| |- 14:0:2:3 sdt     65:48  active ready running
| `- 15:0:2:3 sdaz    67:48  active ready running
`-+- policy='round-robin 0' prio=10 status=enabled
  |- 14:0:0:3 sdd     8:48   active ready running
  |- 15:0:0:3 sdag    66:0   failed faulty running
  |- 14:0:3:3 sdac    65:192 active ready running
  `- 15:0:3:3 sdbh    67:176 active ready running";

    #[test]
    fn parses_aliased_topology() {
        let topology = parse_topology(ALIASED).unwrap();
        assert_eq!(topology.wwid, "360050767088081329800000000000105");
        assert_eq!(topology.vendor, "ALIBABA");
        assert_eq!(topology.product, "MCS");
        assert_eq!(topology.path_count(), 7);
        assert_eq!(topology.paths[0], "sdl");
        assert_eq!(topology.paths[4], "sdd");
        assert!(!topology.paths.contains(&"sdag".to_string()));
    }

    #[test]
    fn parses_unaliased_topology() {
        let output = "360050767088081329800000000000108 dm-9 ALIBABA ,MCS
size=505G features='1 queue_if_no_path' hwhandler='0' wp=rw
`-+- policy='round-robin 0' prio=50 status=active
  |- 14:0:0:6 sdax 67:16  active ready  running
  `- 15:0:1:6 sdbm 68:0   active ready  running";
        let topology = parse_topology(output).unwrap();
        assert_eq!(topology.wwid, "360050767088081329800000000000108");
        assert_eq!(topology.vendor, "ALIBABA");
        assert_eq!(topology.paths, vec!["sdax", "sdbm"]);
    }

    #[test]
    fn product_with_spaces_is_kept_whole() {
        let output = "pv-36e00084100ee7ec9 (36e00084100ee7ec9) dm-3 HUAWEI  ,XSG1 Dorado 5000
size=1.0T features='0' hwhandler='0' wp=rw
`-+- policy='service-time 0' prio=1 status=active
  `- 1:0:0:1 sdb 8:16 active ready running";
        let topology = parse_topology(output).unwrap();
        assert_eq!(topology.wwid, "36e00084100ee7ec9");
        assert_eq!(topology.vendor, "HUAWEI");
        assert_eq!(topology.product, "XSG1 Dorado 5000");
        assert_eq!(topology.paths, vec!["sdb"]);
    }

    #[test]
    fn nvme_paths_use_placeholder_address() {
        let output = "eui.0025388b01c2e1b3 dm-3 NVME ,Disk
`-+- policy='service-time 0' prio=50 status=active
  `- #:#:#:# nvme0n1 259:0 active ready running";
        assert_eq!(count_live_paths(output), 1);
    }

    #[test]
    fn empty_output_is_parse_error() {
        assert!(parse_topology("").is_err());
    }

    #[test]
    fn dev_numbers_are_not_path_addresses() {
        assert!(!is_path_address("8:176"));
        assert!(is_path_address("14:0:1:3"));
        assert!(!is_path_address("a:b:c:d"));
    }
}
