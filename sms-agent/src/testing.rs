// SPDX-License-Identifier: GPL-3.0-only

//! Scripted [`CommandRunner`] for unit tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sms_contracts::{CommandError, CommandLine, CommandOutput, CommandRunner};

#[derive(Debug, Clone)]
enum Reply {
    Stdout(String),
    Fail(String),
    Timeout,
}

struct Rule {
    prefix: String,
    replies: Vec<Reply>,
    served: usize,
}

/// Answers commands by the first rule whose prefix matches the rendered
/// command line. A rule with several replies serves them in order and then
/// repeats the last one. Unmatched commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandLine>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn rule(self, prefix: &str, replies: Vec<Reply>) -> Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                prefix: prefix.to_string(),
                replies,
                served: 0,
            });
        }
        self
    }

    pub fn on(self, prefix: &str, stdout: &str) -> Self {
        self.rule(prefix, vec![Reply::Stdout(stdout.to_string())])
    }

    pub fn on_seq<I, S>(self, prefix: &str, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let replies = outputs
            .into_iter()
            .map(|out| Reply::Stdout(out.into()))
            .collect();
        self.rule(prefix, replies)
    }

    pub fn fail(self, prefix: &str, stderr: &str) -> Self {
        self.rule(prefix, vec![Reply::Fail(stderr.to_string())])
    }

    pub fn time_out(self, prefix: &str) -> Self {
        self.rule(prefix, vec![Reply::Timeout])
    }

    /// Every command run so far, rendered.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.iter().map(ToString::to_string).collect())
            .unwrap_or_default()
    }

    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with(prefix))
            .collect()
    }

    /// Stdin fed to the commands matching `prefix`.
    pub fn stdin_of(&self, prefix: &str) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| {
                calls
                    .iter()
                    .filter(|call| call.to_string().starts_with(prefix))
                    .filter_map(|call| call.stdin.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        command: &CommandLine,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        let rendered = command.to_string();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(command.clone());
        }

        let reply = self.rules.lock().ok().and_then(|mut rules| {
            let rule = rules
                .iter_mut()
                .find(|rule| rendered.starts_with(&rule.prefix))?;
            let index = rule.served.min(rule.replies.len().saturating_sub(1));
            rule.served += 1;
            rule.replies.get(index).cloned()
        });

        match reply {
            None => Ok(CommandOutput::default()),
            Some(Reply::Stdout(stdout)) => Ok(CommandOutput::stdout(stdout)),
            Some(Reply::Fail(stderr)) => Err(CommandError::Failed {
                command: rendered,
                status: Some(1),
                stdout: String::new(),
                stderr,
            }),
            Some(Reply::Timeout) => Err(CommandError::Timeout {
                command: rendered,
                timeout,
            }),
        }
    }
}
