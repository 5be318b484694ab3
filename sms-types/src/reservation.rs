// SPDX-License-Identifier: GPL-3.0-only

//! Persistent-reservation keys, types and the state read back from a LUN.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// PR "service action reservation key" identifying a node.
///
/// Keys handed out by the agent are the node's IPv4 address packed
/// big-endian. Keys read back from storage tools may be unpadded (`0x1`) or
/// wider than 32 bits, so the value is held as a `u64` and compared
/// numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RegistrationKey(u64);

impl RegistrationKey {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn from_ipv4(addr: Ipv4Addr) -> Self {
        Self(u64::from(u32::from(addr)))
    }

    /// Inverse of [`RegistrationKey::from_ipv4`]; `None` when the key does
    /// not fit in 32 bits.
    pub fn to_ipv4(self) -> Option<Ipv4Addr> {
        u32::try_from(self.0).ok().map(Ipv4Addr::from)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for RegistrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl FromStr for RegistrationKey {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.is_empty() || digits.len() > 16 {
            return Err(TypeError::InvalidKey(s.to_string()));
        }
        u64::from_str_radix(digits, 16)
            .map(Self)
            .map_err(|_| TypeError::InvalidKey(s.to_string()))
    }
}

impl TryFrom<String> for RegistrationKey {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RegistrationKey> for String {
    fn from(key: RegistrationKey) -> Self {
        key.to_string()
    }
}

/// Reservation types, numbered by their SCSI PERSISTENT RESERVE OUT code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ReservationType {
    WriteExclusive,
    ExclusiveAccess,
    WriteExclusiveRegistrantsOnly,
    ExclusiveAccessRegistrantsOnly,
    WriteExclusiveAllRegistrants,
    ExclusiveAccessAllRegistrants,
}

impl ReservationType {
    pub const ALL: [ReservationType; 6] = [
        Self::WriteExclusive,
        Self::ExclusiveAccess,
        Self::WriteExclusiveRegistrantsOnly,
        Self::ExclusiveAccessRegistrantsOnly,
        Self::WriteExclusiveAllRegistrants,
        Self::ExclusiveAccessAllRegistrants,
    ];

    /// `--prout-type` value.
    pub fn scsi_code(self) -> u8 {
        match self {
            Self::WriteExclusive => 1,
            Self::ExclusiveAccess => 3,
            Self::WriteExclusiveRegistrantsOnly => 5,
            Self::ExclusiveAccessRegistrantsOnly => 6,
            Self::WriteExclusiveAllRegistrants => 7,
            Self::ExclusiveAccessAllRegistrants => 8,
        }
    }

    /// NVMe `rtype` value.
    pub fn nvme_code(self) -> u8 {
        match self {
            Self::WriteExclusive => 1,
            Self::ExclusiveAccess => 2,
            Self::WriteExclusiveRegistrantsOnly => 3,
            Self::ExclusiveAccessRegistrantsOnly => 4,
            Self::WriteExclusiveAllRegistrants => 5,
            Self::ExclusiveAccessAllRegistrants => 6,
        }
    }

    /// Text used by sg_persist/mpathpersist reports.
    pub fn description(self) -> &'static str {
        match self {
            Self::WriteExclusive => "Write Exclusive",
            Self::ExclusiveAccess => "Exclusive Access",
            Self::WriteExclusiveRegistrantsOnly => "Write Exclusive, registrants only",
            Self::ExclusiveAccessRegistrantsOnly => "Exclusive Access, registrants only",
            Self::WriteExclusiveAllRegistrants => "Write Exclusive, all registrants",
            Self::ExclusiveAccessAllRegistrants => "Exclusive Access, all registrants",
        }
    }

    pub fn from_nvme_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.nvme_code() == code)
    }

    pub fn from_description(text: &str) -> Option<Self> {
        let text = text.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.description().eq_ignore_ascii_case(text))
    }
}

impl TryFrom<u8> for ReservationType {
    type Error = TypeError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|t| t.scsi_code() == code)
            .ok_or(TypeError::UnknownReservationType(code))
    }
}

impl From<ReservationType> for u8 {
    fn from(value: ReservationType) -> Self {
        value.scsi_code()
    }
}

/// Registered keys and current reservation of a LUN.
///
/// Only trustworthy when both underlying queries reported the same
/// generation; readers refuse to build one otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReservationState {
    /// Registered key → number of registrants (one per I_T nexus).
    pub keys: BTreeMap<RegistrationKey, u32>,
    pub generation: u64,
    pub reservation_key: Option<RegistrationKey>,
    pub reservation_type: Option<String>,
}

impl ReservationState {
    pub fn add_registrant(&mut self, key: RegistrationKey) {
        *self.keys.entry(key).or_insert(0) += 1;
    }

    pub fn is_registered(&self, key: RegistrationKey) -> bool {
        self.keys.contains_key(&key)
    }

    pub fn has_no_keys(&self) -> bool {
        self.keys.is_empty()
    }

    /// The registered key when exactly one distinct key is present.
    pub fn sole_key(&self) -> Option<RegistrationKey> {
        if self.keys.len() == 1 {
            self.keys.keys().next().copied()
        } else {
            None
        }
    }

    pub fn has_reservation_type(&self, reservation_type: ReservationType) -> bool {
        self.reservation_type
            .as_deref()
            .and_then(ReservationType::from_description)
            == Some(reservation_type)
    }

    /// Key holding a "Write Exclusive, all registrants" reservation.
    ///
    /// Under WEAR every registrant holds the reservation and targets report
    /// the key as `0x0`; the holder is then the sole registered key.
    pub fn wear_holder(&self) -> Option<RegistrationKey> {
        if !self.has_reservation_type(ReservationType::WriteExclusiveAllRegistrants) {
            return None;
        }
        match self.reservation_key {
            Some(key) if !key.is_zero() => Some(key),
            Some(_) => self.sole_key(),
            None => None,
        }
    }
}
