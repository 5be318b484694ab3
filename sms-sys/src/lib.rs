// SPDX-License-Identifier: GPL-3.0-only

//! Low-level system operations for the storage management agent
//!
//! This crate wraps the command-line tools the agent depends on:
//! - `dmsetup` for reading and (re)provisioning device-mapper tables
//! - `multipathd` / `multipath` for LUN topology and live path counts
//! - `blockdev` and `sg_inq` for geometry and serial numbers
//! - `df`, `xxd` and `pfs` for filesystem usage
//! - `sg_persist` for persistent-reservation capability reports
//! - `nvme list` for NVMe namespace detection
//!
//! Every invocation goes through a [`sms_contracts::CommandRunner`];
//! [`ShellRunner`] is the production implementation. Output parsers are
//! plain functions so they can be tested without the tools installed.

pub mod blockdev;
pub mod dmsetup;
pub mod error;
pub mod fs_usage;
pub mod multipath;
pub mod nvme;
pub mod runner;
pub mod sg_persist;

pub use dmsetup::Dmsetup;
pub use error::{Result, SysError};
pub use runner::ShellRunner;
pub use sg_persist::PrCapabilities;
