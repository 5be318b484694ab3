// SPDX-License-Identifier: GPL-3.0-only

use sms_contracts::{CommandError, ProviderError};
use thiserror::Error;

/// Error types for system-level operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SysError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("failed to parse {what} output: {output}")]
    Parse { what: &'static str, output: String },

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("device {0} no path can write")]
    NoLivePaths(String),
}

impl SysError {
    pub(crate) fn parse(what: &'static str, output: impl Into<String>) -> Self {
        Self::Parse {
            what,
            output: output.into(),
        }
    }
}

impl From<SysError> for ProviderError {
    fn from(error: SysError) -> Self {
        match error {
            SysError::Command(err) => ProviderError::Command(err),
            SysError::Parse { what, output } => ProviderError::Malformed { what, output },
            SysError::DeviceNotFound(name) => ProviderError::NotFound(name),
            err @ SysError::NoLivePaths(_) => ProviderError::Unavailable(err.to_string()),
        }
    }
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;
