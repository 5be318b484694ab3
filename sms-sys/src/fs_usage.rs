// SPDX-License-Identifier: GPL-3.0-only

//! Filesystem detection and usage for ext4 (`df -T`) and pfs volumes.

use std::time::Duration;

use sms_contracts::{CommandLine, CommandRunner, FilesystemUsage};
use sms_types::FsType;
use tracing::debug;

use crate::{Result, SysError};

/// Magic string in the first 16 bytes of a pfs volume.
pub const PFS_MAGIC: &str = "JCSFP";

const GIB: u64 = 1024 * 1024 * 1024;
/// Each pfs child chunk covers 10 GiB.
const PFS_CHILD_BYTES: u64 = 10 * GIB;

/// `pfs du` time budget: 20 s plus 10 s per full 100 GiB.
pub fn pfs_du_timeout(size_bytes: u64) -> Duration {
    Duration::from_secs(20 + 10 * (size_bytes / (100 * GIB)))
}

/// `pfs info` time budget.
pub const PFS_INFO_TIMEOUT: Duration = Duration::from_secs(20);

/// Parse `df -T <dev>`: `Filesystem Type 1K-blocks Used Available Use% Mounted on`.
pub fn parse_df(output: &str) -> Result<FilesystemUsage> {
    let row = output
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.contains("1K-blocks"))
        .last()
        .ok_or_else(|| SysError::parse("df -T", output))?;

    let fields: Vec<&str> = row.split_whitespace().collect();
    if fields.len() < 4 {
        return Err(SysError::parse("df -T", output));
    }
    let blocks: u64 = fields[2]
        .parse()
        .map_err(|_| SysError::parse("df -T", output))?;
    let used: u64 = fields[3]
        .parse()
        .map_err(|_| SysError::parse("df -T", output))?;

    Ok(FilesystemUsage {
        fs_type: FsType::parse(fields[1]),
        size: blocks * 1024,
        used: used * 1024,
    })
}

/// Capacity in bytes from the `nchild=` field of `pfs -C disk info`.
pub fn parse_pfs_capacity(output: &str) -> Result<u64> {
    output
        .split([',', '\n'])
        .map(str::trim)
        .find_map(|field| field.split_whitespace().find_map(|f| f.strip_prefix("nchild=")))
        .and_then(|value| value.parse::<u64>().ok())
        .map(|children| children * PFS_CHILD_BYTES)
        .ok_or_else(|| SysError::parse("pfs info", output))
}

/// Bytes used from the `/mapper_<name>/` row of `pfs -C disk du -d 1`.
pub fn parse_pfs_used(output: &str, name: &str) -> Result<u64> {
    let root = format!("/mapper_{name}/");
    output
        .lines()
        .find(|line| line.trim_end().ends_with(&root))
        .and_then(|line| line.split_whitespace().next())
        .and_then(|value| value.parse::<u64>().ok())
        .map(|kb| kb * 1000)
        .ok_or_else(|| SysError::parse("pfs du", output))
}

async fn is_pfs(runner: &dyn CommandRunner, device_path: &str, timeout: Duration) -> bool {
    let command = CommandLine::new("xxd").args(["-l", "16", device_path]);
    match runner.run(&command, timeout).await {
        Ok(output) => output.stdout.contains(PFS_MAGIC),
        Err(err) => {
            debug!(device_path, error = %err, "xxd probe failed");
            false
        }
    }
}

async fn pfs_usage(runner: &dyn CommandRunner, name: &str, size_bytes: u64) -> FilesystemUsage {
    let mut usage = FilesystemUsage {
        fs_type: FsType::Pfs,
        ..Default::default()
    };

    let volume = format!("mapper_{name}");
    let info = CommandLine::new("pfs").args(["-C", "disk", "info", volume.as_str()]);
    match runner.run(&info, PFS_INFO_TIMEOUT).await {
        Ok(output) => match parse_pfs_capacity(&output.stdout) {
            Ok(size) => usage.size = size,
            Err(err) => debug!(name, error = %err, "pfs capacity unavailable"),
        },
        Err(err) => debug!(name, error = %err, "pfs info failed"),
    }

    let root = format!("/{volume}/");
    let du = CommandLine::new("pfs").args(["-C", "disk", "du", "-d", "1", root.as_str()]);
    match runner.run(&du, pfs_du_timeout(size_bytes)).await {
        Ok(output) => match parse_pfs_used(&output.stdout, name) {
            Ok(used) => usage.used = used,
            Err(err) => debug!(name, error = %err, "pfs usage unavailable"),
        },
        Err(err) => debug!(name, error = %err, "pfs du failed"),
    }

    usage
}

/// Detect the filesystem on `/dev/mapper/<name>` and report its usage.
///
/// pfs is recognised by its on-disk magic; anything else is asked of `df`.
/// A pfs volume whose usage queries fail still reports `FsType::Pfs`.
pub async fn filesystem_usage(
    runner: &dyn CommandRunner,
    device_path: &str,
    name: &str,
    size_bytes: u64,
    timeout: Duration,
) -> Result<FilesystemUsage> {
    if is_pfs(runner, device_path, timeout).await {
        return Ok(pfs_usage(runner, name, size_bytes).await);
    }

    let command = CommandLine::new("df").args(["-T", device_path]);
    let output = runner.run(&command, timeout).await?;
    parse_df(&output.stdout)
}
