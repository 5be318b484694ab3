// SPDX-License-Identifier: GPL-3.0-only

//! NVMe reservations through `nvme-cli`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use sms_contracts::{CommandLine, CommandRunner};
use sms_types::{RegistrationKey, ReservationState, ReservationType};
use tracing::debug;

use super::ReservationBackend;
use crate::error::{AgentError, Result};

/// `nvme resv-report -o json` output.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReservationReport {
    pub r#gen: u64,
    pub rtype: u8,
    pub regctl: u32,
    pub ptpls: u8,
    pub regctlext: Vec<RegisteredController>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RegisteredController {
    pub cntlid: u32,
    /// Bit 0 set when this controller holds the reservation.
    pub rcsts: u8,
    pub rkey: u64,
    pub hostid: String,
}

impl RegisteredController {
    pub fn holds_reservation(&self) -> bool {
        self.rcsts & 1 == 1
    }
}

impl ReservationReport {
    pub fn into_state(self) -> ReservationState {
        let mut state = ReservationState {
            generation: self.r#gen,
            reservation_type: ReservationType::from_nvme_code(self.rtype)
                .map(|t| t.description().to_string()),
            ..Default::default()
        };
        for controller in &self.regctlext {
            state.add_registrant(RegistrationKey::new(controller.rkey));
        }
        state.reservation_key = self
            .regctlext
            .iter()
            .find(|controller| controller.holds_reservation())
            .map(|controller| RegistrationKey::new(controller.rkey));
        state
    }
}

pub fn parse_report(output: &str) -> Result<ReservationState> {
    let report: ReservationReport = serde_json::from_str(output)
        .map_err(|e| AgentError::Parse(format!("invalid NVMe reservation report: {e}")))?;
    Ok(report.into_state())
}

pub struct NvmeBackend {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl NvmeBackend {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    fn nvme(subcommand: &str, device_path: &str) -> CommandLine {
        CommandLine::new("nvme").args([subcommand, device_path, "-n", "1"])
    }

    pub fn report_command(&self, device_path: &str) -> CommandLine {
        Self::nvme("resv-report", device_path).args(["-c", "0x1", "-o", "json"])
    }

    pub fn register_command(&self, device_path: &str, key: RegistrationKey) -> CommandLine {
        Self::nvme("resv-register", device_path)
            .arg("-k")
            .arg(key.to_string())
    }

    pub fn reserve_command(
        &self,
        device_path: &str,
        key: RegistrationKey,
        reservation_type: ReservationType,
    ) -> CommandLine {
        Self::nvme("resv-acquire", device_path)
            .arg("-c")
            .arg(key.to_string())
            .arg("-t")
            .arg(reservation_type.nvme_code().to_string())
            .args(["-a", "0"])
    }

    pub fn preempt_command(
        &self,
        device_path: &str,
        key: RegistrationKey,
        preempted_key: RegistrationKey,
        reservation_type: ReservationType,
    ) -> CommandLine {
        Self::nvme("resv-acquire", device_path)
            .arg("-c")
            .arg(key.to_string())
            .arg("-p")
            .arg(preempted_key.to_string())
            .arg("-t")
            .arg(reservation_type.nvme_code().to_string())
            .args(["-a", "1"])
    }

    pub fn release_command(
        &self,
        device_path: &str,
        key: RegistrationKey,
        reservation_type: ReservationType,
    ) -> CommandLine {
        Self::nvme("resv-release", device_path)
            .arg("-c")
            .arg(key.to_string())
            .arg("-t")
            .arg(reservation_type.nvme_code().to_string())
            .args(["-a", "0"])
    }

    pub fn clear_command(&self, device_path: &str, key: RegistrationKey) -> CommandLine {
        Self::nvme("resv-release", device_path)
            .arg("-c")
            .arg(key.to_string())
            .args(["-a", "1"])
    }

    async fn exec(&self, command: CommandLine) -> Result<()> {
        self.runner.run(&command, self.timeout).await?;
        Ok(())
    }
}

#[async_trait]
impl ReservationBackend for NvmeBackend {
    fn name(&self) -> &'static str {
        "nvme"
    }

    async fn read_state(&self, device_path: &str) -> Result<ReservationState> {
        let output = self
            .runner
            .run(&self.report_command(device_path), self.timeout)
            .await?;
        let state = parse_report(&output.stdout)?;
        debug!(device_path, generation = state.generation, keys = state.keys.len(), "read NVMe reservation state");
        Ok(state)
    }

    async fn register(&self, device_path: &str, key: RegistrationKey) -> Result<()> {
        self.exec(self.register_command(device_path, key)).await
    }

    async fn reserve(
        &self,
        device_path: &str,
        key: RegistrationKey,
        reservation_type: ReservationType,
    ) -> Result<()> {
        self.exec(self.reserve_command(device_path, key, reservation_type))
            .await
    }

    async fn release(
        &self,
        device_path: &str,
        key: RegistrationKey,
        reservation_type: ReservationType,
    ) -> Result<()> {
        self.exec(self.release_command(device_path, key, reservation_type))
            .await
    }

    async fn clear(&self, device_path: &str, key: RegistrationKey) -> Result<()> {
        self.exec(self.clear_command(device_path, key)).await
    }

    async fn preempt(
        &self,
        device_path: &str,
        key: RegistrationKey,
        preempted_key: RegistrationKey,
        reservation_type: ReservationType,
    ) -> Result<()> {
        self.exec(self.preempt_command(device_path, key, preempted_key, reservation_type))
            .await
    }
}
