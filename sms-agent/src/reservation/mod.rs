// SPDX-License-Identifier: GPL-3.0-only

//! Persistent-reservation fencing.
//!
//! A [`ReservationBackend`] knows how to read a LUN's registrations and how
//! to issue each reservation action with one storage protocol (SCSI through
//! `mpathpersist`/`sg_persist`, or NVMe through `nvme-cli`).
//! [`ReservationProtocol`] layers the shared behavior on top: torn-read
//! retry, idempotency checks that skip actions already in effect, and the
//! preempt sequence.

pub mod nvme;
pub mod paths;
pub mod scsi;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sms_contracts::CommandRunner;
use sms_sys::multipath::VOLUME_ALIAS_PREFIX;
use sms_sys::sg_persist::{PrCapabilities, WRITE_EXCLUSIVE_ALL_REGISTRANTS};
use sms_types::{PrOp, PrSupport, RegistrationKey, ReservationState, ReservationType};
use tracing::{debug, info, warn};

use crate::error::{AgentError, Result};

pub use nvme::NvmeBackend;
pub use paths::{DeviceLocator, PathProbe};
pub use scsi::ScsiBackend;

#[async_trait]
pub trait ReservationBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// One read of the LUN's keys and reservation. Fails with
    /// `StaleGeneration` when the read was torn by a concurrent change.
    async fn read_state(&self, device_path: &str) -> Result<ReservationState>;

    async fn register(&self, device_path: &str, key: RegistrationKey) -> Result<()>;

    async fn reserve(
        &self,
        device_path: &str,
        key: RegistrationKey,
        reservation_type: ReservationType,
    ) -> Result<()>;

    async fn release(
        &self,
        device_path: &str,
        key: RegistrationKey,
        reservation_type: ReservationType,
    ) -> Result<()>;

    async fn clear(&self, device_path: &str, key: RegistrationKey) -> Result<()>;

    async fn preempt(
        &self,
        device_path: &str,
        key: RegistrationKey,
        preempted_key: RegistrationKey,
        reservation_type: ReservationType,
    ) -> Result<()>;
}

pub fn register_is_redundant(state: &ReservationState, key: RegistrationKey) -> bool {
    state.is_registered(key)
}

pub fn reserve_is_redundant(state: &ReservationState, key: RegistrationKey) -> bool {
    state.has_no_keys() && state.is_registered(key)
}

pub fn clear_is_redundant(state: &ReservationState) -> bool {
    state.has_no_keys()
}

/// `key` already holds the only registration under a WEAR reservation.
pub fn preempt_is_redundant(state: &ReservationState, key: RegistrationKey) -> bool {
    state.reservation_key.is_some()
        && state.has_reservation_type(ReservationType::WriteExclusiveAllRegistrants)
        && state.sole_key() == Some(key)
}

/// Build the PR support summary from a capability report and, when it could
/// be read, the current reservation state.
pub fn pr_support_summary(
    capabilities: Option<&PrCapabilities>,
    state: Option<&ReservationState>,
) -> PrSupport {
    PrSupport {
        wear_supported: capabilities
            .is_some_and(|caps| caps.supports(WRITE_EXCLUSIVE_ALL_REGISTRANTS)),
        capabilities: capabilities.map(ToString::to_string).unwrap_or_default(),
        held_key: state.and_then(ReservationState::wear_holder),
    }
}

/// Picks the backend for each device: NVMe when enabled and `nvme list`
/// knows the id, SCSI otherwise.
pub struct BackendSelector {
    runner: Arc<dyn CommandRunner>,
    scsi: ScsiBackend,
    nvme: NvmeBackend,
    nvme_enabled: bool,
    probe_timeout: Duration,
}

impl BackendSelector {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        scsi: ScsiBackend,
        nvme: NvmeBackend,
        nvme_enabled: bool,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            scsi,
            nvme,
            nvme_enabled,
            probe_timeout,
        }
    }

    pub fn nvme_enabled(&self) -> bool {
        self.nvme_enabled
    }

    pub async fn for_volume(&self, volume_id: &str) -> &dyn ReservationBackend {
        if !self.nvme_enabled {
            return &self.scsi;
        }
        let wwid = volume_id
            .strip_prefix(VOLUME_ALIAS_PREFIX)
            .unwrap_or(volume_id);
        match sms_sys::nvme::is_nvme_volume(self.runner.as_ref(), wwid, self.probe_timeout).await {
            Ok(true) => &self.nvme,
            Ok(false) => &self.scsi,
            Err(err) => {
                debug!(volume_id, error = %err, "nvme probe failed, using SCSI");
                &self.scsi
            }
        }
    }
}

pub struct ReservationProtocol<'a> {
    backend: &'a dyn ReservationBackend,
    stale_read_backoff: Duration,
}

impl<'a> ReservationProtocol<'a> {
    pub fn new(backend: &'a dyn ReservationBackend, stale_read_backoff: Duration) -> Self {
        Self {
            backend,
            stale_read_backoff,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Read the reservation state, retrying once after a torn read.
    pub async fn read_state(&self, device_path: &str) -> Result<ReservationState> {
        match self.backend.read_state(device_path).await {
            Err(err @ AgentError::StaleGeneration { .. }) => {
                debug!(device_path, error = %err, "torn reservation read, retrying once");
                tokio::time::sleep(self.stale_read_backoff).await;
                self.backend.read_state(device_path).await
            }
            other => other,
        }
    }

    /// State for an idempotency check; `None` means the check is skipped
    /// and the action runs.
    async fn state_for_check(&self, device_path: &str) -> Option<ReservationState> {
        match self.read_state(device_path).await {
            Ok(state) => Some(state),
            Err(err) => {
                info!(device_path, error = %err, "cannot read reservation state, executing anyway");
                None
            }
        }
    }

    pub async fn register(&self, device_path: &str, key: RegistrationKey) -> Result<()> {
        if let Some(state) = self.state_for_check(device_path).await {
            if register_is_redundant(&state, key) {
                info!(device_path, %key, "key already registered, skipping register");
                return Ok(());
            }
        }
        self.backend.register(device_path, key).await
    }

    pub async fn reserve(
        &self,
        device_path: &str,
        key: RegistrationKey,
        reservation_type: ReservationType,
    ) -> Result<()> {
        if let Some(state) = self.state_for_check(device_path).await {
            if reserve_is_redundant(&state, key) {
                info!(device_path, %key, "reservation already in effect, skipping reserve");
                return Ok(());
            }
        }
        self.backend.reserve(device_path, key, reservation_type).await
    }

    pub async fn release(
        &self,
        device_path: &str,
        key: RegistrationKey,
        reservation_type: ReservationType,
    ) -> Result<()> {
        self.backend.release(device_path, key, reservation_type).await
    }

    pub async fn clear(&self, device_path: &str, key: RegistrationKey) -> Result<()> {
        if let Some(state) = self.state_for_check(device_path).await {
            if clear_is_redundant(&state) {
                info!(device_path, "no registered keys, skipping clear");
                return Ok(());
            }
        }
        self.backend.clear(device_path, key).await
    }

    /// Take over the reservation from `preempted_key`.
    ///
    /// Registers `key` if needed. When `preempted_key` holds no registration
    /// there is nothing to preempt and a plain reserve is issued instead.
    pub async fn preempt(
        &self,
        device_path: &str,
        key: RegistrationKey,
        preempted_key: RegistrationKey,
        reservation_type: ReservationType,
    ) -> Result<()> {
        let state = self.read_state(device_path).await?;
        if preempt_is_redundant(&state, key) {
            info!(device_path, %key, "already sole holder, skipping preempt");
            return Ok(());
        }

        if !state.is_registered(key) {
            debug!(device_path, %key, "registering before preempt");
            self.backend.register(device_path, key).await?;
        }

        if !state.is_registered(preempted_key) {
            info!(device_path, %key, %preempted_key, "preempted key absent, reserving instead");
            return self.backend.reserve(device_path, key, reservation_type).await;
        }

        info!(device_path, %key, %preempted_key, backend = self.backend.name(), "preempting reservation");
        self.backend
            .preempt(device_path, key, preempted_key, reservation_type)
            .await
    }

    /// Run a mutating reservation operation.
    pub async fn execute(&self, device_path: &str, op: &PrOp) -> Result<()> {
        match *op {
            PrOp::Register { key } => self.register(device_path, key).await,
            PrOp::Reserve {
                key,
                reservation_type,
            } => self.reserve(device_path, key, reservation_type).await,
            PrOp::Release {
                key,
                reservation_type,
            } => self.release(device_path, key, reservation_type).await,
            PrOp::Clear { key } => self.clear(device_path, key).await,
            PrOp::Preempt {
                key,
                preempted_key,
                reservation_type,
            } => {
                self.preempt(device_path, key, preempted_key, reservation_type)
                    .await
            }
            PrOp::PathCount | PrOp::PathCanWrite | PrOp::PathCannotWrite => {
                warn!(device_path, op = %op.code(), "path operation sent to reservation protocol");
                Err(AgentError::Unsupported(format!(
                    "{} is not a reservation action",
                    op.code()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    fn state(keys: &[u64], holder: Option<u64>, reservation_type: Option<&str>) -> ReservationState {
        let mut state = ReservationState {
            generation: 1,
            reservation_key: holder.map(RegistrationKey::new),
            reservation_type: reservation_type.map(str::to_string),
            ..Default::default()
        };
        for &key in keys {
            state.add_registrant(RegistrationKey::new(key));
        }
        state
    }

    #[test]
    fn preempt_skips_only_for_sole_wear_holder() {
        let wear = Some("Write Exclusive, all registrants");
        let k1 = RegistrationKey::new(1);
        assert!(preempt_is_redundant(&state(&[1, 1], Some(0), wear), k1));
        assert!(!preempt_is_redundant(&state(&[1, 2], Some(0), wear), k1));
        assert!(!preempt_is_redundant(&state(&[1], None, None), k1));
        assert!(!preempt_is_redundant(
            &state(&[1], Some(1), Some("Write Exclusive")),
            k1
        ));
    }

    #[test]
    fn redundancy_checks() {
        let k1 = RegistrationKey::new(1);
        assert!(register_is_redundant(&state(&[1], None, None), k1));
        assert!(!register_is_redundant(&state(&[2], None, None), k1));
        assert!(clear_is_redundant(&state(&[], None, None)));
        assert!(!clear_is_redundant(&state(&[2], None, None)));
        assert!(!reserve_is_redundant(&state(&[1], Some(1), None), k1));
    }

    #[test]
    fn pr_support_reports_wear_holder() {
        let capabilities =
            PrCapabilities::parse("  Write Exclusive, all registrants: 1\n  Exclusive Access: 0\n");
        let held = state(&[0xc6134001], Some(0), Some("Write Exclusive, all registrants"));

        let support = pr_support_summary(Some(&capabilities), Some(&held));
        assert!(support.wear_supported);
        assert_eq!(support.held_key, Some(RegistrationKey::new(0xc6134001)));
        assert!(support.capabilities.contains("Write Exclusive, all registrants:1;"));

        let unknown = pr_support_summary(None, None);
        assert!(!unknown.wear_supported);
        assert_eq!(unknown.held_key, None);
    }

    fn selector(runner: Arc<ScriptedRunner>, nvme_enabled: bool) -> BackendSelector {
        let timeout = Duration::from_secs(5);
        BackendSelector::new(
            runner.clone(),
            ScsiBackend::new(runner.clone(), timeout, 2),
            NvmeBackend::new(runner, timeout),
            nvme_enabled,
            timeout,
        )
    }

    #[tokio::test]
    async fn selects_nvme_only_for_listed_ids() {
        let runner = Arc::new(ScriptedRunner::new().on(
            "nvme list",
            "/dev/nvme0n1     6e00084100ee7ec9     HUAWEI XSG1   1",
        ));
        let enabled = selector(runner.clone(), true);

        assert_eq!(enabled.for_volume("36e00084100ee7ec9").await.name(), "nvme");
        assert_eq!(enabled.for_volume("pv-36e00084100ee7ec9").await.name(), "nvme");
        assert_eq!(enabled.for_volume("360050767088081329800000000000105").await.name(), "scsi");

        let disabled = selector(runner, false);
        assert_eq!(disabled.for_volume("36e00084100ee7ec9").await.name(), "scsi");
    }

    #[tokio::test]
    async fn probe_failure_falls_back_to_scsi() {
        let runner = Arc::new(ScriptedRunner::new().fail("nvme list", "nvme: not permitted"));
        let enabled = selector(runner, true);
        assert_eq!(enabled.for_volume("36e00084100ee7ec9").await.name(), "scsi");
    }
}
