// SPDX-License-Identifier: GPL-3.0-only

//! Reservation commands exchanged between the manager and the agent.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::reservation::{RegistrationKey, ReservationType};
use crate::volume::VolumeType;

/// Numeric command codes used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PrOpCode {
    Register,
    Reserve,
    Release,
    Clear,
    Preempt,
    PathCount,
    PathCanWrite,
    PathCannotWrite,
}

impl PrOpCode {
    pub const ALL: [PrOpCode; 8] = [
        Self::Register,
        Self::Reserve,
        Self::Release,
        Self::Clear,
        Self::Preempt,
        Self::PathCount,
        Self::PathCanWrite,
        Self::PathCannotWrite,
    ];

    pub fn code(self) -> u8 {
        match self {
            Self::Register => 0,
            Self::Reserve => 1,
            Self::Release => 2,
            Self::Clear => 3,
            Self::Preempt => 4,
            Self::PathCount => 5,
            Self::PathCanWrite => 6,
            Self::PathCannotWrite => 7,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Reserve => "reserve",
            Self::Release => "release",
            Self::Clear => "clear",
            Self::Preempt => "preempt",
            Self::PathCount => "path_count",
            Self::PathCanWrite => "path_can_write",
            Self::PathCannotWrite => "path_cannot_write",
        }
    }
}

impl fmt::Display for PrOpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for PrOpCode {
    type Error = TypeError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|op| op.code() == code)
            .ok_or(TypeError::UnknownOpCode(code))
    }
}

impl From<PrOpCode> for u8 {
    fn from(value: PrOpCode) -> Self {
        value.code()
    }
}

/// A logical reservation operation together with its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PrOp {
    Register {
        key: RegistrationKey,
    },
    Reserve {
        key: RegistrationKey,
        reservation_type: ReservationType,
    },
    Release {
        key: RegistrationKey,
        reservation_type: ReservationType,
    },
    Clear {
        key: RegistrationKey,
    },
    Preempt {
        key: RegistrationKey,
        preempted_key: RegistrationKey,
        reservation_type: ReservationType,
    },
    PathCount,
    PathCanWrite,
    PathCannotWrite,
}

impl PrOp {
    pub fn code(&self) -> PrOpCode {
        match self {
            Self::Register { .. } => PrOpCode::Register,
            Self::Reserve { .. } => PrOpCode::Reserve,
            Self::Release { .. } => PrOpCode::Release,
            Self::Clear { .. } => PrOpCode::Clear,
            Self::Preempt { .. } => PrOpCode::Preempt,
            Self::PathCount => PrOpCode::PathCount,
            Self::PathCanWrite => PrOpCode::PathCanWrite,
            Self::PathCannotWrite => PrOpCode::PathCannotWrite,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrCommand {
    #[serde(flatten)]
    pub op: PrOp,
    pub volume_type: VolumeType,
    pub volume_id: String,
}

impl PrCommand {
    pub fn new(op: PrOp, volume_type: VolumeType, volume_id: impl Into<String>) -> Self {
        Self {
            op,
            volume_type,
            volume_id: volume_id.into(),
        }
    }

    /// Same operation addressed to another device (used for fan-out).
    pub fn retarget(&self, volume_id: impl Into<String>) -> Self {
        Self {
            op: self.op.clone(),
            volume_type: self.volume_type,
            volume_id: volume_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrCommandResult {
    pub op: PrOpCode,
    pub volume_type: VolumeType,
    pub volume_id: String,
    /// Path count for `PathCount`, 0 otherwise.
    pub result: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BatchPrCommand {
    pub cmds: Vec<PrCommand>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BatchPrResult {
    pub results: Vec<PrCommandResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_json_carries_op_tag_and_params() {
        let command = PrCommand::new(
            PrOp::Preempt {
                key: RegistrationKey::new(0x0aee0bc1),
                preempted_key: RegistrationKey::new(0x0aee0bc2),
                reservation_type: ReservationType::WriteExclusiveAllRegistrants,
            },
            VolumeType::Multipath,
            "36e00084100ee7ec9",
        );

        let json = serde_json::to_value(&command).expect("serialize command");
        assert_eq!(json["op"], "preempt");
        assert_eq!(json["key"], "0x0aee0bc1");
        assert_eq!(json["reservation_type"], 7);
        assert_eq!(json["volume_type"], "multipath");

        let parsed: PrCommand = serde_json::from_value(json).expect("deserialize command");
        assert_eq!(parsed, command);
    }

    #[test]
    fn unknown_op_codes_are_rejected() {
        assert_eq!(PrOpCode::try_from(4).unwrap(), PrOpCode::Preempt);
        assert_eq!(PrOpCode::try_from(42), Err(TypeError::UnknownOpCode(42)));
    }
}
