// SPDX-License-Identifier: GPL-3.0-only

//! `dmsetup` facade.

use std::time::Duration;

use sms_contracts::{CommandError, CommandLine, CommandRunner};
use sms_types::DeviceType;
use tracing::{debug, info};

use crate::Result;

/// stderr printed when a named device has no table.
pub const NO_SUCH_DEVICE: &str = "No such device or address";
/// stdout printed when a listing matches nothing.
pub const NO_DEVICE_FOUND: &str = "No device found";

fn is_empty_listing(stdout: &str) -> bool {
    stdout.contains(NO_DEVICE_FOUND) || stdout.contains("No devices found")
}

pub struct Dmsetup<'a> {
    runner: &'a dyn CommandRunner,
    timeout: Duration,
}

impl<'a> Dmsetup<'a> {
    pub fn new(runner: &'a dyn CommandRunner, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    /// `dmsetup table --concise [--target t] [names...]`.
    ///
    /// Returns an empty string when the device does not exist or the listing
    /// matched nothing.
    pub async fn table_concise(&self, target: Option<DeviceType>, names: &[&str]) -> Result<String> {
        let mut command = CommandLine::new("dmsetup").args(["table", "--concise"]);
        if let Some(target) = target {
            command = command.args(["--target", target.as_str()]);
        }
        command = command.args(names.iter().copied());

        match self.runner.run(&command, self.timeout).await {
            Ok(output) if is_empty_listing(&output.stdout) => {
                debug!(command = %command, "no device-mapper devices matched");
                Ok(String::new())
            }
            Ok(output) => Ok(output.stdout.trim().to_string()),
            Err(err @ CommandError::Failed { .. }) if err.stderr().contains(NO_SUCH_DEVICE) => {
                debug!(command = %command, "device has no table");
                Ok(String::new())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        Ok(!self.table_concise(None, &[name]).await?.is_empty())
    }

    /// `dmsetup create <name>` with the table on stdin.
    pub async fn create(&self, name: &str, table: &str) -> Result<()> {
        info!(name, "creating device-mapper device");
        self.with_table("create", name, table).await
    }

    /// `dmsetup load <name>`: stage a table in the inactive slot.
    pub async fn load(&self, name: &str, table: &str) -> Result<()> {
        self.with_table("load", name, table).await
    }

    /// `dmsetup reload <name>`: replace the inactive table.
    pub async fn reload(&self, name: &str, table: &str) -> Result<()> {
        info!(name, "reloading device-mapper table");
        self.with_table("reload", name, table).await
    }

    pub async fn suspend(&self, name: &str) -> Result<()> {
        self.simple("suspend", name).await
    }

    pub async fn resume(&self, name: &str) -> Result<()> {
        self.simple("resume", name).await
    }

    /// `dmsetup remove -f <name>`.
    pub async fn remove(&self, name: &str) -> Result<()> {
        info!(name, "removing device-mapper device");
        let command = CommandLine::new("dmsetup").args(["remove", "-f", name]);
        self.runner.run(&command, self.timeout).await?;
        Ok(())
    }

    async fn with_table(&self, action: &str, name: &str, table: &str) -> Result<()> {
        let command = CommandLine::new("dmsetup")
            .args([action, name])
            .with_stdin(table);
        self.runner.run(&command, self.timeout).await?;
        Ok(())
    }

    async fn simple(&self, action: &str, name: &str) -> Result<()> {
        let command = CommandLine::new("dmsetup").args([action, name]);
        self.runner.run(&command, self.timeout).await?;
        Ok(())
    }
}
