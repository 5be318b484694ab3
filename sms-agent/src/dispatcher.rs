// SPDX-License-Identifier: GPL-3.0-only

//! Routes reservation commands to devices and backends.

use std::sync::Arc;
use std::time::Duration;

use sms_contracts::CommandRunner;
use sms_sys::Dmsetup;
use sms_types::{BatchPrCommand, BatchPrResult, PrCommand, PrCommandResult, PrOp, VolumeType};
use tracing::{debug, info};

use crate::config::RetryConfig;
use crate::error::{AgentError, Result};
use crate::query::read_children;
use crate::reservation::{BackendSelector, DeviceLocator, PathProbe, ReservationProtocol};
use crate::retry::with_retry;

pub struct Dispatcher {
    runner: Arc<dyn CommandRunner>,
    backends: Arc<BackendSelector>,
    locator: DeviceLocator,
    probe: PathProbe,
    command_timeout: Duration,
    stale_read_backoff: Duration,
    batch_retry: RetryConfig,
}

impl Dispatcher {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        backends: Arc<BackendSelector>,
        locator: DeviceLocator,
        probe: PathProbe,
        command_timeout: Duration,
        stale_read_backoff: Duration,
        batch_retry: RetryConfig,
    ) -> Self {
        Self {
            runner,
            backends,
            locator,
            probe,
            command_timeout,
            stale_read_backoff,
            batch_retry,
        }
    }

    /// Execute `command` against its volume. Composite volumes fan out to
    /// every child and stop at the first failure.
    pub async fn process(&self, command: &PrCommand) -> Result<Vec<PrCommandResult>> {
        match command.volume_type {
            VolumeType::DmMirror => Err(AgentError::Unsupported(format!(
                "reservations on {} volume {}",
                command.volume_type, command.volume_id
            ))),
            volume_type if volume_type.is_composite() => {
                let dmsetup = Dmsetup::new(self.runner.as_ref(), self.command_timeout);
                let children = read_children(&dmsetup, &command.volume_id).await?;
                if children.is_empty() {
                    return Err(AgentError::Validation(format!(
                        "{} volume {} has no children",
                        volume_type, command.volume_id
                    )));
                }
                debug!(volume_id = %command.volume_id, ?children, "fanning out");

                let mut results = Vec::with_capacity(children.len());
                for child in children {
                    results.push(self.execute(&command.retarget(child)).await?);
                }
                Ok(results)
            }
            _ => Ok(vec![self.execute(command).await?]),
        }
    }

    /// Process every command in order, retrying the whole batch on failure.
    pub async fn process_batch(&self, batch: &BatchPrCommand) -> Result<BatchPrResult> {
        with_retry(
            self.batch_retry.attempts,
            self.batch_retry.backoff(),
            || self.run_batch(batch),
        )
        .await
    }

    async fn run_batch(&self, batch: &BatchPrCommand) -> Result<BatchPrResult> {
        let mut results = Vec::new();
        for command in &batch.cmds {
            results.extend(self.process(command).await?);
        }
        Ok(BatchPrResult { results })
    }

    async fn execute(&self, command: &PrCommand) -> Result<PrCommandResult> {
        let device_path = self.locator.resolve(&command.volume_id)?;
        let result = match command.op {
            PrOp::PathCount => u64::from(self.probe.path_count(&device_path).await?),
            PrOp::PathCanWrite => {
                self.probe.can_write(&device_path).await?;
                0
            }
            PrOp::PathCannotWrite => {
                self.probe.cannot_write(&device_path).await?;
                0
            }
            PrOp::Register { .. }
            | PrOp::Reserve { .. }
            | PrOp::Release { .. }
            | PrOp::Clear { .. }
            | PrOp::Preempt { .. } => {
                let backend = self.backends.for_volume(&command.volume_id).await;
                let protocol = ReservationProtocol::new(backend, self.stale_read_backoff);
                debug!(
                    volume_id = %command.volume_id,
                    backend = protocol.backend_name(),
                    "executing reservation command"
                );
                protocol.execute(&device_path, &command.op).await?;
                0
            }
        };
        info!(
            op = %command.op.code(),
            volume_id = %command.volume_id,
            device_path = %device_path,
            result,
            "reservation command done"
        );
        Ok(PrCommandResult {
            op: command.op.code(),
            volume_type: command.volume_type,
            volume_id: command.volume_id.clone(),
            result,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use sms_types::{RegistrationKey, ReservationType};

    use super::*;
    use crate::reservation::{NvmeBackend, ScsiBackend};
    use crate::testing::ScriptedRunner;

    const K1: RegistrationKey = RegistrationKey::new(0x0aee0bc1);

    fn mapper_dir(tag: &str, nodes: &[&str]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sms-dispatch-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        for node in nodes {
            fs::write(dir.join(node), b"").unwrap();
        }
        dir
    }

    fn dispatcher(runner: &Arc<ScriptedRunner>, dir: &PathBuf, attempts: u32) -> Dispatcher {
        let timeout = Duration::from_secs(5);
        let backends = BackendSelector::new(
            runner.clone(),
            ScsiBackend::new(runner.clone(), timeout, 2),
            NvmeBackend::new(runner.clone(), timeout),
            false,
            timeout,
        );
        Dispatcher::new(
            runner.clone(),
            Arc::new(backends),
            DeviceLocator::new(dir),
            PathProbe::new(runner.clone(), timeout),
            timeout,
            Duration::ZERO,
            RetryConfig {
                attempts,
                backoff_ms: 0,
            },
        )
    }

    fn register(volume_type: VolumeType, volume_id: &str) -> PrCommand {
        PrCommand::new(PrOp::Register { key: K1 }, volume_type, volume_id)
    }

    #[tokio::test]
    async fn linear_volume_fans_out_to_children() {
        let dir = mapper_dir("fanout", &["pv-a", "pv-b"]);
        let runner = Arc::new(ScriptedRunner::new().on(
            "dmsetup table --concise lvid-1",
            "lvid-1,,3,L--w,0 100 linear /dev/mapper/pv-a 8192,100 100 linear /dev/mapper/pv-b 8192",
        ));
        let dispatcher = dispatcher(&runner, &dir, 1);

        let results = dispatcher
            .process(&register(VolumeType::DmLinear, "lvid-1"))
            .await
            .unwrap();

        let ids: Vec<&str> = results.iter().map(|r| r.volume_id.as_str()).collect();
        assert_eq!(ids, vec!["pv-a", "pv-b"]);
        assert_eq!(runner.calls_matching("mpathpersist -v 2 --out --register").len(), 2);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn fan_out_stops_at_first_failure() {
        let dir = mapper_dir("abort", &["pv-a", "pv-b"]);
        let pv_a = dir.join("pv-a").to_string_lossy().into_owned();
        let runner = Arc::new(
            ScriptedRunner::new()
                .on(
                    "dmsetup table --concise lvid-1",
                    "lvid-1,,3,L--w,0 100 linear /dev/mapper/pv-a 8192,100 100 linear /dev/mapper/pv-b 8192",
                )
                .fail(
                    &format!("mpathpersist -v 2 --out --register --param-sark=0x0aee0bc1 {pv_a}"),
                    "reservation conflict",
                ),
        );
        let dispatcher = dispatcher(&runner, &dir, 1);

        let err = dispatcher
            .process(&register(VolumeType::DmLinear, "lvid-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::CommandExec(_)));
        assert_eq!(runner.calls_matching("mpathpersist -v 2 --out").len(), 1);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn path_count_reports_result() {
        let dir = mapper_dir("count", &["pv-36e00084100ee7ec9"]);
        let runner = Arc::new(ScriptedRunner::new().on(
            "multipath -ll",
            "36e00084100ee7ec9 dm-3 HUAWEI ,XSG1\n  |- 1:0:0:1 sdb 8:16 active ready running\n  `- 3:0:0:1 sdd 8:48 active ready running",
        ));
        let dispatcher = dispatcher(&runner, &dir, 1);

        let results = dispatcher
            .process(&PrCommand::new(
                PrOp::PathCount,
                VolumeType::Multipath,
                "36e00084100ee7ec9",
            ))
            .await
            .unwrap();
        assert_eq!(results[0].result, 2);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn mirror_is_unsupported() {
        let dir = mapper_dir("mirror", &[]);
        let runner = Arc::new(ScriptedRunner::new());
        let dispatcher = dispatcher(&runner, &dir, 1);
        assert!(matches!(
            dispatcher
                .process(&register(VolumeType::DmMirror, "lvid-2"))
                .await,
            Err(AgentError::Unsupported(_))
        ));
        assert!(runner.calls().is_empty());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn batch_retries_then_returns_last_error() {
        let dir = mapper_dir("batch", &["pv-a"]);
        let runner = Arc::new(ScriptedRunner::new().time_out("mpathpersist -v 2 --out --reserve"));
        let dispatcher = dispatcher(&runner, &dir, 3);
        let batch = BatchPrCommand {
            cmds: vec![
                register(VolumeType::Multipath, "pv-a"),
                PrCommand::new(
                    PrOp::Reserve {
                        key: K1,
                        reservation_type: ReservationType::WriteExclusiveAllRegistrants,
                    },
                    VolumeType::Multipath,
                    "pv-a",
                ),
            ],
        };

        let err = dispatcher.process_batch(&batch).await.unwrap_err();
        assert!(matches!(&err, AgentError::CommandExec(inner) if inner.is_timeout()));
        assert_eq!(runner.calls_matching("mpathpersist -v 2 --out --reserve").len(), 3);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn batch_collects_results_in_order() {
        let dir = mapper_dir("batch-ok", &["pv-a", "pv-b"]);
        let runner = Arc::new(ScriptedRunner::new());
        let dispatcher = dispatcher(&runner, &dir, 3);
        let batch = BatchPrCommand {
            cmds: vec![
                register(VolumeType::Multipath, "pv-b"),
                register(VolumeType::Multipath, "pv-a"),
            ],
        };

        let result = dispatcher.process_batch(&batch).await.unwrap();
        let ids: Vec<&str> = result.results.iter().map(|r| r.volume_id.as_str()).collect();
        assert_eq!(ids, vec!["pv-b", "pv-a"]);
        fs::remove_dir_all(&dir).unwrap();
    }
}
