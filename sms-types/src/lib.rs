// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for the storage management agent
//!
//! This crate defines the single source of truth for the agent's domain types.
//! These models are used throughout the stack:
//!
//! - **sms-sys**: Returns topology/usage values that feed these types
//! - **sms-agent**: Parses device-mapper tables into `Device` and drives the
//!   reservation protocol with `PrCommand` / `ReservationState`
//!
//! ## Architecture
//!
//! ### Device-mapper tables
//! - `TableExtent` → one row of a dm table
//! - `DeviceTarget` → closed set of {Multipath, Linear, Striped} targets
//! - `Device` → a fully assembled device descriptor
//!
//! ### Fencing
//! - `RegistrationKey` → PR key derived from a node IPv4 address
//! - `ReservationState` → keys + reservation, read from the storage target
//! - `PrCommand` → a logical reservation operation addressed to a volume

pub mod command;
pub mod device;
pub mod error;
pub mod reservation;
pub mod volume;

pub use command::{BatchPrCommand, BatchPrResult, PrCommand, PrCommandResult, PrOp, PrOpCode};
pub use device::{
    Device, DeviceChild, DeviceTarget, DeviceType, FsType, LinearTarget, MultipathArgs,
    MultipathTarget, PrSupport, StripedArgs, StripedTarget, TableExtent, TargetArgs, TargetRef,
    SECTOR_BYTES,
};
pub use error::TypeError;
pub use reservation::{RegistrationKey, ReservationState, ReservationType};
pub use volume::VolumeType;
