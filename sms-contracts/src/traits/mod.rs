// SPDX-License-Identifier: GPL-3.0-only

pub mod capability;
pub mod runner;

pub use capability::{CapabilityProvider, FilesystemUsage, MultipathTopology, ProviderError};
pub use runner::{CommandError, CommandLine, CommandOutput, CommandRunner};
