// SPDX-License-Identifier: GPL-3.0-only

//! SCSI-3 persistent reservations through `mpathpersist` and `sg_persist`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sms_contracts::{CommandLine, CommandRunner};
use sms_types::{RegistrationKey, ReservationState, ReservationType};
use tracing::debug;

use super::ReservationBackend;
use crate::error::{AgentError, Result};

/// Value of a `PR generation=0x85, ...` line.
fn parse_generation(line: &str) -> Option<u64> {
    let value = line
        .strip_prefix("PR generation")?
        .trim_start()
        .strip_prefix('=')?
        .split(',')
        .next()?
        .trim();
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u64::from_str_radix(digits, 16).ok()
}

/// Registered keys from `mpathpersist --in -k`, one entry per registrant.
pub fn parse_keys(output: &str) -> Result<(u64, Vec<RegistrationKey>)> {
    let mut generation = None;
    let mut keys = Vec::new();
    for line in output.lines().map(str::trim) {
        if line.starts_with("PR generation") {
            generation = parse_generation(line);
        } else if line.starts_with("0x") {
            keys.push(line.parse::<RegistrationKey>()?);
        }
    }
    let generation = generation.ok_or_else(|| {
        AgentError::Parse(format!("no PR generation in key report: '{}'", output.trim()))
    })?;
    Ok((generation, keys))
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReservationReport {
    pub generation: u64,
    pub key: Option<RegistrationKey>,
    pub reservation_type: Option<String>,
}

/// Holder and type from `mpathpersist --in -r`.
pub fn parse_reservation(output: &str) -> Result<ReservationReport> {
    let mut generation = None;
    let mut report = ReservationReport::default();
    for line in output.lines().map(str::trim) {
        if line.starts_with("PR generation") {
            generation = parse_generation(line);
        } else if let Some(rest) = line.strip_prefix("Key") {
            let value = rest.trim_start().trim_start_matches('=').trim();
            report.key = Some(value.parse()?);
        } else if line.starts_with("scope") {
            report.reservation_type = line
                .split_once(',')
                .and_then(|(_, kind)| kind.split_once('='))
                .map(|(_, value)| value.trim().to_string())
                .filter(|value| !value.is_empty());
        }
    }
    report.generation = generation.ok_or_else(|| {
        AgentError::Parse(format!(
            "no PR generation in reservation report: '{}'",
            output.trim()
        ))
    })?;
    Ok(report)
}

/// Combine both reports; they must describe the same generation.
pub fn parse_state(device: &str, keys_output: &str, reservation_output: &str) -> Result<ReservationState> {
    let (keys_generation, keys) = parse_keys(keys_output)?;
    let reservation = parse_reservation(reservation_output)?;
    if keys_generation != reservation.generation {
        return Err(AgentError::StaleGeneration {
            device: device.to_string(),
            keys_generation,
            reservation_generation: reservation.generation,
        });
    }

    let mut state = ReservationState {
        generation: keys_generation,
        reservation_key: reservation.key,
        reservation_type: reservation.reservation_type,
        ..Default::default()
    };
    for key in keys {
        state.add_registrant(key);
    }
    Ok(state)
}

pub struct ScsiBackend {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
    log_level: u8,
}

impl ScsiBackend {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration, log_level: u8) -> Self {
        Self {
            runner,
            timeout,
            log_level,
        }
    }

    fn mpathpersist(&self) -> CommandLine {
        CommandLine::new("mpathpersist").args(["-v".to_string(), self.log_level.to_string()])
    }

    pub fn read_keys_command(&self, device_path: &str) -> CommandLine {
        self.mpathpersist().args(["--in", "-k", device_path])
    }

    pub fn read_reservation_command(&self, device_path: &str) -> CommandLine {
        self.mpathpersist().args(["--in", "-r", device_path])
    }

    pub fn register_command(&self, device_path: &str, key: RegistrationKey) -> CommandLine {
        self.mpathpersist()
            .args(["--out", "--register"])
            .arg(format!("--param-sark={key}"))
            .arg(device_path)
    }

    pub fn reserve_command(
        &self,
        device_path: &str,
        key: RegistrationKey,
        reservation_type: ReservationType,
    ) -> CommandLine {
        self.mpathpersist()
            .args(["--out", "--reserve"])
            .arg(format!("--param-rk={key}"))
            .arg(format!("--prout-type={}", reservation_type.scsi_code()))
            .arg(device_path)
    }

    pub fn release_command(&self, device_path: &str) -> CommandLine {
        self.mpathpersist()
            .args(["--out", "--register-ignore"])
            .arg(device_path)
    }

    pub fn clear_command(&self, device_path: &str, key: RegistrationKey) -> CommandLine {
        self.mpathpersist()
            .args(["--out", "--clear"])
            .arg(format!("--param-rk={key}"))
            .arg(device_path)
    }

    pub fn preempt_command(
        &self,
        device_path: &str,
        key: RegistrationKey,
        preempted_key: RegistrationKey,
        reservation_type: ReservationType,
    ) -> CommandLine {
        CommandLine::new("sg_persist")
            .args(["--out", "--preempt"])
            .arg(format!("--param-sark={preempted_key}"))
            .arg(format!("--param-rk={key}"))
            .arg(format!("--prout-type={}", reservation_type.scsi_code()))
            .arg(device_path)
    }

    async fn exec(&self, command: CommandLine) -> Result<()> {
        self.runner.run(&command, self.timeout).await?;
        Ok(())
    }
}

#[async_trait]
impl ReservationBackend for ScsiBackend {
    fn name(&self) -> &'static str {
        "scsi"
    }

    async fn read_state(&self, device_path: &str) -> Result<ReservationState> {
        let keys = self
            .runner
            .run(&self.read_keys_command(device_path), self.timeout)
            .await?;
        let reservation = self
            .runner
            .run(&self.read_reservation_command(device_path), self.timeout)
            .await?;
        let state = parse_state(device_path, &keys.stdout, &reservation.stdout)?;
        debug!(device_path, generation = state.generation, keys = state.keys.len(), "read SCSI reservation state");
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
        _key: RegistrationKey,
        _reservation_type: ReservationType,
    ) -> Result<()> {
        self.exec(self.release_command(device_path)).await
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
