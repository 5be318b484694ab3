// SPDX-License-Identifier: GPL-3.0-only

//! Persistent-reservation capability report (`sg_persist -c --in`).

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use sms_contracts::{CommandLine, CommandRunner};

use crate::Result;

pub const COMPATIBLE_RESERVATION_HANDLING: &str = "Compatible Reservation Handling(CRH)";
pub const SPECIFY_INITIATOR_PORTS: &str = "Specify Initiator Ports Capable(SIP_C)";
pub const ALL_TARGET_PORTS: &str = "All Target Ports Capable(ATP_C)";
pub const PERSIST_THROUGH_POWER_LOSS_CAPABLE: &str = "Persist Through Power Loss Capable(PTPL_C)";
pub const PERSIST_THROUGH_POWER_LOSS_ACTIVE: &str = "Persist Through Power Loss Active(PTPL_A)";
pub const WRITE_EXCLUSIVE_ALL_REGISTRANTS: &str = "Write Exclusive, all registrants";
pub const EXCLUSIVE_ACCESS_ALL_REGISTRANTS: &str = "Exclusive Access, all registrants";

/// Capability name → reported value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PrCapabilities {
    entries: BTreeMap<String, String>,
}

impl PrCapabilities {
    /// Every `name: value` line with a non-empty value becomes an entry.
    pub fn parse(output: &str) -> Self {
        let entries = output
            .lines()
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim(), value.trim()))
            .filter(|(name, value)| !name.is_empty() && !value.is_empty())
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        Self { entries }
    }

    /// True iff the capability is reported with value `1`.
    pub fn supports(&self, capability: &str) -> bool {
        self.entries.get(capability).is_some_and(|value| value == "1")
    }

    pub fn get(&self, capability: &str) -> Option<&str> {
        self.entries.get(capability).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `name:value;` pairs.
impl fmt::Display for PrCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            write!(f, "{name}:{value};")?;
        }
        Ok(())
    }
}

/// `sg_persist -c --in <device>`.
pub async fn report_capabilities(
    runner: &dyn CommandRunner,
    device_path: &str,
    timeout: Duration,
) -> Result<PrCapabilities> {
    let command = CommandLine::new("sg_persist").args(["-c", "--in", device_path]);
    let output = runner.run(&command, timeout).await?;
    Ok(PrCapabilities::parse(&output.stdout))
}
