// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;

/// Errors raised while converting raw values into domain types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    #[error("invalid registration key '{0}'")]
    InvalidKey(String),

    #[error("unknown reservation type code {0}")]
    UnknownReservationType(u8),

    #[error("unknown PR command code {0}")]
    UnknownOpCode(u8),

    #[error("sector count of {0} overflows")]
    SectorOverflow(String),
}
