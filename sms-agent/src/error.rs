// SPDX-License-Identifier: GPL-3.0-only

use sms_contracts::{CommandError, ErrorKind, Failure, ProviderError};
use sms_sys::SysError;
use sms_types::TypeError;
use thiserror::Error;

/// Agent-level errors
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(
        "Reservation generation changed on {device}: keys report {keys_generation:#x}, reservation report {reservation_generation:#x}"
    )]
    StaleGeneration {
        device: String,
        keys_generation: u64,
        reservation_generation: u64,
    },

    #[error("Command failed: {0}")]
    CommandExec(#[from] CommandError),

    #[error("Not supported: {0}")]
    Unsupported(String),

    #[error("Volume {0} is busy")]
    Busy(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Parse(_) | Self::Validation(_) | Self::Serialization(_) => {
                ErrorKind::InvalidInput
            }
            Self::DeviceNotFound(_) => ErrorKind::NotFound,
            Self::StaleGeneration { .. } => ErrorKind::Conflict,
            Self::CommandExec(err) if err.is_timeout() => ErrorKind::Timeout,
            Self::CommandExec(_) => ErrorKind::CommandFailed,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::Busy(_) => ErrorKind::Busy,
            Self::Config(_) => ErrorKind::Internal,
        }
    }
}

impl From<AgentError> for Failure {
    fn from(err: AgentError) -> Self {
        Failure::new(err.kind(), err.to_string())
    }
}

impl From<SysError> for AgentError {
    fn from(err: SysError) -> Self {
        match err {
            SysError::Command(err) => Self::CommandExec(err),
            err @ SysError::Parse { .. } => Self::Parse(err.to_string()),
            SysError::DeviceNotFound(name) => Self::DeviceNotFound(name),
            err @ SysError::NoLivePaths(_) => Self::Validation(err.to_string()),
        }
    }
}

impl From<ProviderError> for AgentError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Command(err) => Self::CommandExec(err),
            err @ ProviderError::Malformed { .. } => Self::Parse(err.to_string()),
            ProviderError::NotFound(name) => Self::DeviceNotFound(name),
            ProviderError::Unavailable(reason) => Self::Validation(reason),
        }
    }
}

impl From<TypeError> for AgentError {
    fn from(err: TypeError) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
