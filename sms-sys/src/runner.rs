// SPDX-License-Identifier: GPL-3.0-only

//! Production [`CommandRunner`] backed by `tokio::process`.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use sms_contracts::{CommandError, CommandLine, CommandOutput, CommandRunner};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Spawns each command directly (no shell) and kills it on timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(
        &self,
        command: &CommandLine,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        let rendered = command.to_string();
        debug!(command = %rendered, ?timeout, "executing command");

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(if command.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(&rendered, e.to_string()))?;

        let stdin = child.stdin.take();
        let finished = async {
            if let (Some(input), Some(mut stdin)) = (command.stdin.as_deref(), stdin) {
                stdin
                    .write_all(input.as_bytes())
                    .await
                    .map_err(|e| spawn_error(&rendered, format!("failed to write stdin: {e}")))?;
            }
            child
                .wait_with_output()
                .await
                .map_err(|e| spawn_error(&rendered, e.to_string()))
        };

        // Dropping the future on timeout drops the child, which kills it.
        let outcome = tokio::time::timeout(timeout, finished).await;
        let output = match outcome {
            Ok(result) => result?,
            Err(_) => {
                warn!(command = %rendered, ?timeout, "command timed out");
                return Err(CommandError::Timeout {
                    command: rendered,
                    timeout,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            debug!(command = %rendered, status = ?output.status.code(), %stderr, "command failed");
            return Err(CommandError::Failed {
                command: rendered,
                status: output.status.code(),
                stdout,
                stderr,
            });
        }

        Ok(CommandOutput { stdout, stderr })
    }
}

fn spawn_error(command: &str, reason: String) -> CommandError {
    CommandError::Spawn {
        command: command.to_string(),
        reason,
    }
}
