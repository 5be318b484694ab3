// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

use serde::{Deserialize, Serialize};

/// Class of a volume addressed by a reservation command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolumeType {
    #[serde(rename = "multipath")]
    Multipath,
    #[serde(rename = "dm-linear")]
    DmLinear,
    #[serde(rename = "dm-stripe")]
    DmStriped,
    #[serde(rename = "dm-mirror")]
    DmMirror,
}

impl VolumeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Multipath => "multipath",
            Self::DmLinear => "dm-linear",
            Self::DmStriped => "dm-stripe",
            Self::DmMirror => "dm-mirror",
        }
    }

    /// Built from several physical devices; reservations fan out to them.
    pub fn is_composite(self) -> bool {
        !matches!(self, Self::Multipath)
    }
}

impl fmt::Display for VolumeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_device_mapper_volumes_are_composite() {
        assert!(!VolumeType::Multipath.is_composite());
        assert!(VolumeType::DmLinear.is_composite());
        assert!(VolumeType::DmStriped.is_composite());
    }
}
