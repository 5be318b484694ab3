// SPDX-License-Identifier: GPL-3.0-only

use std::time::Duration;

use sms_contracts::{CommandLine, CommandRunner};

use crate::{Result, SysError};

fn parse_number(what: &'static str, output: &str) -> Result<u64> {
    output
        .lines()
        .next()
        .map(str::trim)
        .and_then(|line| line.parse().ok())
        .ok_or_else(|| SysError::parse(what, output))
}

/// Logical sector size from `blockdev --getss`.
pub fn parse_sector_size(output: &str) -> Result<u32> {
    let value = parse_number("blockdev --getss", output)?;
    u32::try_from(value).map_err(|_| SysError::parse("blockdev --getss", output))
}

/// Value of the `serial number` line printed by `sg_inq`.
pub fn parse_serial_number(output: &str) -> Option<String> {
    output
        .lines()
        .find(|line| line.to_ascii_lowercase().contains("serial number"))
        .and_then(|line| line.split_once(':'))
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub async fn sector_size(
    runner: &dyn CommandRunner,
    device_path: &str,
    timeout: Duration,
) -> Result<u32> {
    let command = CommandLine::new("blockdev").args(["--getss", device_path]);
    let output = runner.run(&command, timeout).await?;
    parse_sector_size(&output.stdout)
}

/// Device size in bytes from `blockdev --getsize64`.
pub async fn size_bytes(
    runner: &dyn CommandRunner,
    device_path: &str,
    timeout: Duration,
) -> Result<u64> {
    let command = CommandLine::new("blockdev").args(["--getsize64", device_path]);
    let output = runner.run(&command, timeout).await?;
    parse_number("blockdev --getsize64", &output.stdout)
}

pub async fn serial_number(
    runner: &dyn CommandRunner,
    device_path: &str,
    timeout: Duration,
) -> Result<String> {
    let command = CommandLine::new("sg_inq").arg(device_path);
    let output = runner.run(&command, timeout).await?;
    parse_serial_number(&output.stdout).ok_or_else(|| SysError::parse("sg_inq", output.stdout))
}
