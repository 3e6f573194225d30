//! Subprocess execution with a hard timeout.
//!
//! Commands are always argument vectors handed to the OS directly, never a
//! string passed through a shell.

use std::fmt;
use std::future::Future;
use std::io;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

/// Standard timeout for OS listing commands
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(3);

/// Extended timeout for the one-time warm-up retry
pub const WARMUP_TIMEOUT: Duration = Duration::from_secs(5);

/// A program and its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
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
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured output of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (`None` if killed by a signal)
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Why a command produced no output
#[derive(Debug, Error)]
pub enum CommandError {
    /// The program is not installed
    #[error("command not found: {program}")]
    NotFound { program: String },

    /// The command did not finish in time and was killed
    #[error("command timed out after {}ms: {command}", timeout.as_millis())]
    Timeout { command: String, timeout: Duration },

    /// Spawning or waiting failed
    #[error("failed to run {command}: {source}")]
    Io {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// Executes commands on behalf of the platform strategies
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion, killing it after `timeout`
    fn run(
        &self,
        spec: &CommandSpec,
        timeout: Duration,
    ) -> impl Future<Output = Result<CommandOutput, CommandError>> + Send;
}

/// Runs commands with `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec, timeout: Duration) -> Result<CommandOutput, CommandError> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CommandError::NotFound {
                    program: spec.program.clone(),
                });
            }
            Ok(Err(e)) => {
                return Err(CommandError::Io {
                    command: spec.to_string(),
                    source: e,
                });
            }
            // The child is killed when the output future is dropped
            Err(_) => {
                return Err(CommandError::Timeout {
                    command: spec.to_string(),
                    timeout,
                });
            }
        };

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_display() {
        let spec = CommandSpec::new("ps").args(["-ww", "-eo"]).arg("pid,ppid,args");
        assert_eq!(spec.to_string(), "ps -ww -eo pid,ppid,args");
    }

    #[tokio::test]
    async fn test_missing_program_is_not_found() {
        let spec = CommandSpec::new("lsquota-definitely-not-a-real-program");
        let err = SystemRunner.run(&spec, COMMAND_TIMEOUT).await.unwrap_err();
        assert!(matches!(err, CommandError::NotFound { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_stdout() {
        let spec = CommandSpec::new("echo").arg("hello");
        let output = SystemRunner.run(&spec, COMMAND_TIMEOUT).await.unwrap();
        assert_eq!(output.status, Some(0));
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_command() {
        let spec = CommandSpec::new("sleep").arg("5");
        let err = SystemRunner
            .run(&spec, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Timeout { .. }));
    }
}
