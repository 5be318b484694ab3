// SPDX-License-Identifier: GPL-3.0-only

use std::time::Duration;

use sms_contracts::{CommandLine, CommandRunner};

use crate::Result;

/// Whether the `nvme` tool is installed.
pub fn nvme_cli_available() -> bool {
    which::which("nvme").is_ok()
}

/// Whether `nvme list` output mentions `id`, or `id` with one leading `3`
/// stripped (the NAA prefix multipath adds to NVMe wwids).
pub fn list_mentions(output: &str, id: &str) -> bool {
    if id.is_empty() {
        return false;
    }
    if output.contains(id) {
        return true;
    }
    match id.strip_prefix('3') {
        Some(rest) if !rest.is_empty() => output.contains(rest),
        _ => false,
    }
}

/// Run `nvme list` and check it for `id`.
pub async fn is_nvme_volume(
    runner: &dyn CommandRunner,
    id: &str,
    timeout: Duration,
) -> Result<bool> {
    let output = runner.run(&CommandLine::new("nvme").arg("list"), timeout).await?;
    Ok(list_mentions(&output.stdout, id))
}
