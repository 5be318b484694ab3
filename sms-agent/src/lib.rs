// SPDX-License-Identifier: GPL-3.0-only

//! Storage management agent
//!
//! Runs on every database host attached to shared SAN/NVMe storage and does
//! two jobs for the central manager:
//!
//! - **Device discovery**: reads device-mapper tables (`table`), enriches them
//!   with multipath topology, geometry, filesystem usage and reservation
//!   support (`assembler`, `capabilities`), and lists or looks up devices
//!   (`query`). Agent-managed linear and striped volumes are provisioned
//!   through `mapper`.
//! - **Fencing**: executes persistent-reservation commands (`reservation`)
//!   against multipath LUNs, fanning out across the children of composite
//!   volumes (`dispatcher`), so that exactly one host can write after a
//!   failover.
//!
//! [`Agent`] owns the shared pieces; request bodies from the manager enter
//! through [`handler::RequestHandler`].

pub mod agent;
pub mod assembler;
pub mod capabilities;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod locks;
pub mod mapper;
pub mod query;
pub mod reservation;
pub mod retry;
pub mod table;

#[cfg(test)]
mod testing;

pub use agent::Agent;
pub use config::AgentConfig;
pub use error::{AgentError, Result};
