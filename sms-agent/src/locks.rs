// SPDX-License-Identifier: GPL-3.0-only

//! Per-volume in-process exclusion for reprovisioning operations.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::error::{AgentError, Result};

#[derive(Debug, Clone, Default)]
pub struct VolumeLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl VolumeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, HashSet<String>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take the lock for `volume_id`, or fail with `Busy` if someone holds it.
    pub fn try_acquire(&self, volume_id: &str) -> Result<VolumeGuard> {
        if !self.held().insert(volume_id.to_string()) {
            debug!(volume_id, "volume is locked by another operation");
            return Err(AgentError::Busy(volume_id.to_string()));
        }
        Ok(VolumeGuard {
            locks: self.clone(),
            volume_id: volume_id.to_string(),
        })
    }

    pub fn is_locked(&self, volume_id: &str) -> bool {
        self.held().contains(volume_id)
    }
}

/// Releases the volume when dropped.
#[derive(Debug)]
pub struct VolumeGuard {
    locks: VolumeLocks,
    volume_id: String,
}

impl Drop for VolumeGuard {
    fn drop(&mut self) {
        self.locks.held().remove(&self.volume_id);
    }
}
