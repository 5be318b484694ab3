// SPDX-License-Identifier: GPL-3.0-only

//! Shell command gateway.
//!
//! Every external tool the agent drives (`dmsetup`, `multipathd`,
//! `mpathpersist`, `sg_persist`, `nvme`, `blockdev`, ...) is invoked through a
//! [`CommandRunner`], which bounds each invocation with a timeout.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// A program and its arguments. Arguments are passed as-is, never through a
/// shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("failed to spawn `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("`{command}` exited with {status:?}; stdout: {stdout}; stderr: {stderr}")]
    Failed {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

impl CommandError {
    pub fn command(&self) -> &str {
        match self {
            Self::Spawn { command, .. }
            | Self::Timeout { command, .. }
            | Self::Failed { command, .. } => command,
        }
    }

    /// Captured stderr; empty when the process never ran to completion.
    pub fn stderr(&self) -> &str {
        match self {
            Self::Failed { stderr, .. } => stderr,
            Self::Spawn { .. } | Self::Timeout { .. } => "",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` to completion. A nonzero exit is `CommandError::Failed`;
    /// exceeding `timeout` kills the process and yields `CommandError::Timeout`.
    async fn run(
        &self,
        command: &CommandLine,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_program_and_args() {
        let command = CommandLine::new("mpathpersist")
            .args(["-v", "2", "--in", "-k"])
            .arg("/dev/mapper/pv-36e0");
        assert_eq!(
            command.to_string(),
            "mpathpersist -v 2 --in -k /dev/mapper/pv-36e0"
        );
    }

    #[test]
    fn failed_error_exposes_stderr() {
        let error = CommandError::Failed {
            command: "dmsetup table --concise x".to_string(),
            status: Some(1),
            stdout: String::new(),
            stderr: "No such device or address".to_string(),
        };
        assert_eq!(error.stderr(), "No such device or address");
        assert!(error.to_string().contains("dmsetup table --concise x"));
    }
}
