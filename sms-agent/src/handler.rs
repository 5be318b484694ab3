// SPDX-License-Identifier: GPL-3.0-only

//! JSON request handlers for reservation commands sent by the manager.
//!
//! Requests carry a numeric `cmd_type` and a `cmd_param` object whose
//! fields depend on it:
//!
//! ```json
//! {"cmd_type": 4, "volume_type": "multipath", "volume_id": "36e00084100ee7ec9",
//!  "cmd_param": {"register_key": "0x0aee0bc1", "preempted_key": "0x0aee0bc2", "reserve_type": 7}}
//! ```
//!
//! Every response is a JSON object tagged by `status`: either `success` with
//! the results, or `failure` with a [`Failure`].

use serde::{Deserialize, Serialize};
use sms_contracts::Failure;
use sms_types::{
    BatchPrCommand, PrCommand, PrCommandResult, PrOp, PrOpCode, RegistrationKey, ReservationType,
    TypeError, VolumeType,
};
use tracing::{error, info};

use crate::dispatcher::Dispatcher;
use crate::error::{AgentError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WirePrParam {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub register_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserve_type: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preempted_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirePrCommand {
    pub cmd_type: u8,
    pub volume_type: VolumeType,
    pub volume_id: String,
    #[serde(default)]
    pub cmd_param: WirePrParam,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WireBatchPrCommand {
    pub cmds: Vec<WirePrCommand>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirePrResult {
    pub check_type: u8,
    pub check_result: u64,
    pub volume_type: VolumeType,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WirePrResults {
    pub results: Vec<WirePrResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response<T> {
    Success { content: T },
    Failure { error: Failure },
}

impl WirePrParam {
    fn key(&self, field: &'static str, value: Option<&String>) -> Result<RegistrationKey> {
        let value = value.ok_or_else(|| AgentError::Validation(format!("missing {field}")))?;
        Ok(value.parse()?)
    }

    fn register_key(&self) -> Result<RegistrationKey> {
        self.key("register_key", self.register_key.as_ref())
    }

    fn preempted_key(&self) -> Result<RegistrationKey> {
        self.key("preempted_key", self.preempted_key.as_ref())
    }

    fn reservation_type(&self) -> Result<ReservationType> {
        let code = self
            .reserve_type
            .ok_or_else(|| AgentError::Validation("missing reserve_type".to_string()))?;
        Ok(ReservationType::try_from(code)?)
    }
}

impl TryFrom<WirePrCommand> for PrCommand {
    type Error = AgentError;

    fn try_from(wire: WirePrCommand) -> Result<Self> {
        let code = PrOpCode::try_from(wire.cmd_type).map_err(|err| match err {
            TypeError::UnknownOpCode(code) => {
                AgentError::Unsupported(format!("command type {code}"))
            }
            other => AgentError::from(other),
        })?;
        let param = &wire.cmd_param;
        let op = match code {
            PrOpCode::Register => PrOp::Register {
                key: param.register_key()?,
            },
            PrOpCode::Reserve => PrOp::Reserve {
                key: param.register_key()?,
                reservation_type: param.reservation_type()?,
            },
            PrOpCode::Release => PrOp::Release {
                key: param.register_key()?,
                reservation_type: param.reservation_type()?,
            },
            PrOpCode::Clear => PrOp::Clear {
                key: param.register_key()?,
            },
            PrOpCode::Preempt => PrOp::Preempt {
                key: param.register_key()?,
                preempted_key: param.preempted_key()?,
                reservation_type: param.reservation_type()?,
            },
            PrOpCode::PathCount => PrOp::PathCount,
            PrOpCode::PathCanWrite => PrOp::PathCanWrite,
            PrOpCode::PathCannotWrite => PrOp::PathCannotWrite,
        };
        Ok(PrCommand::new(op, wire.volume_type, wire.volume_id))
    }
}

impl From<PrCommandResult> for WirePrResult {
    fn from(result: PrCommandResult) -> Self {
        Self {
            check_type: result.op.code(),
            check_result: result.result,
            volume_type: result.volume_type,
            name: result.volume_id,
        }
    }
}

fn to_wire(results: Vec<PrCommandResult>) -> WirePrResults {
    WirePrResults {
        results: results.into_iter().map(WirePrResult::from).collect(),
    }
}

fn encode<T: Serialize>(outcome: Result<T>) -> String {
    let response = match outcome {
        Ok(content) => Response::Success { content },
        Err(err) => {
            error!(error = %err, "request failed");
            Response::Failure {
                error: Failure::from(err),
            }
        }
    };
    serde_json::to_string(&response).unwrap_or_else(|err| {
        error!(error = %err, "failed to encode response");
        format!(
            r#"{{"status":"failure","error":{{"kind":"internal","message":"{}"}}}}"#,
            err.to_string().replace('"', "'")
        )
    })
}

pub struct RequestHandler<'a> {
    dispatcher: &'a Dispatcher,
}

impl<'a> RequestHandler<'a> {
    pub fn new(dispatcher: &'a Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// One reservation command. Composite volumes answer with one result
    /// per child.
    pub async fn handle_pr(&self, body: &str) -> String {
        encode(self.pr(body).await)
    }

    pub async fn handle_batch_pr(&self, body: &str) -> String {
        encode(self.batch_pr(body).await)
    }

    async fn pr(&self, body: &str) -> Result<WirePrResults> {
        let wire: WirePrCommand = serde_json::from_str(body)?;
        let command = PrCommand::try_from(wire)?;
        info!(op = %command.op.code(), volume_id = %command.volume_id, "handling reservation command");
        Ok(to_wire(self.dispatcher.process(&command).await?))
    }

    async fn batch_pr(&self, body: &str) -> Result<WirePrResults> {
        let wire: WireBatchPrCommand = serde_json::from_str(body)?;
        let batch = BatchPrCommand {
            cmds: wire
                .cmds
                .into_iter()
                .map(PrCommand::try_from)
                .collect::<Result<Vec<_>>>()?,
        };
        info!(count = batch.cmds.len(), "handling reservation batch");
        Ok(to_wire(self.dispatcher.process_batch(&batch).await?.results))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;

    use sms_contracts::ErrorKind;

    use super::*;
    use crate::config::RetryConfig;
    use crate::reservation::{BackendSelector, DeviceLocator, NvmeBackend, PathProbe, ScsiBackend};
    use crate::testing::ScriptedRunner;

    fn wire(cmd_type: u8, param: WirePrParam) -> WirePrCommand {
        WirePrCommand {
            cmd_type,
            volume_type: VolumeType::Multipath,
            volume_id: "36e00084100ee7ec9".to_string(),
            cmd_param: param,
        }
    }

    #[test]
    fn decodes_preempt_with_all_params() {
        let body = r#"{"cmd_type":4,"volume_type":"multipath","volume_id":"36e00084100ee7ec9",
            "cmd_param":{"register_key":"0x0aee0bc1","preempted_key":"0xaee0bc2","reserve_type":7}}"#;
        let wire: WirePrCommand = serde_json::from_str(body).unwrap();
        let command = PrCommand::try_from(wire).unwrap();
        assert_eq!(
            command.op,
            PrOp::Preempt {
                key: RegistrationKey::new(0x0aee0bc1),
                preempted_key: RegistrationKey::new(0x0aee0bc2),
                reservation_type: ReservationType::WriteExclusiveAllRegistrants,
            }
        );
    }

    #[test]
    fn path_commands_need_no_params() {
        let body = r#"{"cmd_type":5,"volume_type":"dm-linear","volume_id":"lvid-1"}"#;
        let wire: WirePrCommand = serde_json::from_str(body).unwrap();
        let command = PrCommand::try_from(wire).unwrap();
        assert_eq!(command.op, PrOp::PathCount);
        assert_eq!(command.volume_type, VolumeType::DmLinear);
    }

    #[test]
    fn unknown_command_type_is_unsupported() {
        let err = PrCommand::try_from(wire(9, WirePrParam::default())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn missing_or_bad_params_are_rejected() {
        let err = PrCommand::try_from(wire(0, WirePrParam::default())).unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));

        let bad_type = WirePrParam {
            register_key: Some("0x1".to_string()),
            reserve_type: Some(2),
            preempted_key: None,
        };
        assert!(matches!(
            PrCommand::try_from(wire(1, bad_type)),
            Err(AgentError::Parse(_))
        ));
    }

    fn dispatcher(runner: &Arc<ScriptedRunner>, dir: &std::path::Path) -> Dispatcher {
        let timeout = Duration::from_secs(5);
        Dispatcher::new(
            runner.clone(),
            Arc::new(BackendSelector::new(
                runner.clone(),
                ScsiBackend::new(runner.clone(), timeout, 2),
                NvmeBackend::new(runner.clone(), timeout),
                false,
                timeout,
            )),
            DeviceLocator::new(dir),
            PathProbe::new(runner.clone(), timeout),
            timeout,
            Duration::ZERO,
            RetryConfig {
                attempts: 1,
                backoff_ms: 0,
            },
        )
    }

    #[tokio::test]
    async fn responses_carry_results_or_failure() {
        let dir = std::env::temp_dir().join(format!("sms-handler-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("pv-36e00084100ee7ec9"), b"").unwrap();

        let runner = Arc::new(ScriptedRunner::new());
        let dispatcher = dispatcher(&runner, &dir);
        let handler = RequestHandler::new(&dispatcher);

        let ok = handler
            .handle_pr(
                r#"{"cmd_type":0,"volume_type":"multipath","volume_id":"36e00084100ee7ec9","cmd_param":{"register_key":"0x0aee0bc1"}}"#,
            )
            .await;
        let ok: Response<WirePrResults> = serde_json::from_str(&ok).unwrap();
        assert_eq!(
            ok,
            Response::Success {
                content: WirePrResults {
                    results: vec![WirePrResult {
                        check_type: 0,
                        check_result: 0,
                        volume_type: VolumeType::Multipath,
                        name: "36e00084100ee7ec9".to_string(),
                    }],
                },
            }
        );

        let missing = handler
            .handle_batch_pr(
                r#"{"cmds":[{"cmd_type":5,"volume_type":"multipath","volume_id":"36e0000000000000"}]}"#,
            )
            .await;
        let missing: Response<WirePrResults> = serde_json::from_str(&missing).unwrap();
        assert!(matches!(
            missing,
            Response::Failure { error } if error.kind == ErrorKind::NotFound
        ));

        let garbage = handler.handle_pr("not json").await;
        assert!(garbage.contains(r#""status":"failure""#));
        fs::remove_dir_all(&dir).unwrap();
    }
}
