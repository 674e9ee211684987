//! External command execution.
//!
//! Everything that shells out (`systemd-notify`, `ip route`, `useradd`,
//! `hwclock`, `net user`, ...) goes through [`CommandRunner`] so callers can
//! be exercised against a recording fake.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::CommandError;

/// Captured output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program args..` to completion. A non-zero exit is an error.
    async fn run(
        &self,
        cancel: &CancellationToken,
        program: &str,
        args: &[&str],
    ) -> Result<CommandOutput, CommandError>;
}

/// Run a command and discard its output.
pub async fn quiet(
    runner: &dyn CommandRunner,
    cancel: &CancellationToken,
    program: &str,
    args: &[&str],
) -> Result<(), CommandError> {
    runner.run(cancel, program, args).await.map(|_| ())
}

/// `program arg1 arg2` for logs and errors.
pub fn command_line(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

/// [`CommandRunner`] backed by `tokio::process`.
///
/// The child is killed if the root context is cancelled mid-run.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioRunner;

#[async_trait]
impl CommandRunner for TokioRunner {
    async fn run(
        &self,
        cancel: &CancellationToken,
        program: &str,
        args: &[&str],
    ) -> Result<CommandOutput, CommandError> {
        let command = command_line(program, args);
        tracing::debug!(command = %command, "running command");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CommandError::Cancelled { command }),
            output = cmd.output() => output.map_err(|source| CommandError::Spawn {
                command: command.clone(),
                source,
            })?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(CommandError::Failed {
                command,
                status: output.status.to_string(),
                stderr,
            });
        }
        Ok(CommandOutput { stdout, stderr })
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    //! Recording runner for tests.

    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone)]
    enum Reply {
        Stdout(String),
        Fail(String),
    }

    /// Records every command line. Replies are matched by command-line
    /// prefix, first registered wins; unmatched commands succeed with empty
    /// output.
    #[derive(Debug, Default)]
    pub struct FakeRunner {
        calls: Mutex<Vec<String>>,
        replies: Mutex<Vec<(String, Reply)>>,
    }

    impl FakeRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(&self, prefix: &str, stdout: &str) {
            self.push(prefix, Reply::Stdout(stdout.to_string()));
        }

        pub fn fail(&self, prefix: &str, stderr: &str) {
            self.push(prefix, Reply::Fail(stderr.to_string()));
        }

        /// Every command line run so far, in order.
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }

        fn push(&self, prefix: &str, reply: Reply) {
            self.replies
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((prefix.to_string(), reply));
        }
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(
            &self,
            cancel: &CancellationToken,
            program: &str,
            args: &[&str],
        ) -> Result<CommandOutput, CommandError> {
            let command = command_line(program, args);
            if cancel.is_cancelled() {
                return Err(CommandError::Cancelled { command });
            }
            self.calls
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(command.clone());

            let reply = self
                .replies
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .find(|(prefix, _)| command.starts_with(prefix.as_str()))
                .map(|(_, reply)| reply.clone());

            match reply {
                Some(Reply::Fail(stderr)) => Err(CommandError::Failed {
                    command,
                    status: "exit status: 1".to_string(),
                    stderr,
                }),
                Some(Reply::Stdout(stdout)) => Ok(CommandOutput {
                    stdout,
                    stderr: String::new(),
                }),
                None => Ok(CommandOutput::default()),
            }
        }
    }
}
