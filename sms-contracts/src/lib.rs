// SPDX-License-Identifier: GPL-3.0-only

pub mod protocol;
pub mod traits;

pub use protocol::{ErrorKind, Failure};
pub use traits::{
    CapabilityProvider, CommandError, CommandLine, CommandOutput, CommandRunner, FilesystemUsage,
    MultipathTopology, ProviderError,
};
