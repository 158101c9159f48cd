//! # Shell Command Boundary
//!
//! The only effectful boundary the orchestration core uses to reach the build
//! engine, the sync tool and remote hosts. Everything above this layer composes
//! command lines; everything below it spawns processes.
//!
//! ## Core Components
//!
//! - **[`ShellExecutor`]**: async trait implemented by every executor
//! - **[`HostShell`]**: runs command lines through `sh -c` on this machine
//! - **[`SshShell`]**: wraps another executor and runs command lines on a remote
//!   host, retrying transient connection drops with bounded exponential backoff
//! - **[`ShellCommand`]**: command line plus environment and working directory
//! - **[`CommandOutput`]**: captured stdout, stderr, exit code and duration
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use dockwright::shell::{HostShell, ShellCommand, ShellExecutor};
//!
//! #[tokio::main]
//! async fn main() -> dockwright::Result<()> {
//!     let shell = HostShell::new();
//!     let output = shell
//!         .execute(ShellCommand::new("echo $GREETING").with_env("GREETING", "hello"))
//!         .await?;
//!     assert!(output.stdout.contains("hello"));
//!     Ok(())
//! }
//! ```

use crate::error::{DockwrightError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Host-based command execution.
pub mod host;

/// Remote command execution over ssh.
pub mod ssh;

#[cfg(test)]
pub(crate) mod testing;

pub use host::HostShell;
pub use ssh::SshShell;

/// Result of command execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutput {
    /// Standard output from the command
    pub stdout: String,
    /// Standard error from the command
    pub stderr: String,
    /// Exit code (0 = success, -1 = terminated by signal)
    pub exit_code: i32,
    /// Wall-clock duration of the command
    pub duration: Duration,
}

impl CommandOutput {
    /// Output of a command that succeeded with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    /// Output of a command that failed with the given code and stderr.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            exit_code,
            ..Default::default()
        }
    }

    /// Check if the command executed successfully (exit code 0)
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a nonzero exit into [`DockwrightError::CommandFailure`].
    pub fn check(self, command: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(DockwrightError::CommandFailure {
                command: command.to_string(),
                exit_code: self.exit_code,
                stdout: self.stdout,
                stderr: self.stderr,
            })
        }
    }
}

/// Command to execute
#[derive(Debug, Clone, PartialEq)]
pub struct ShellCommand {
    /// Shell command line, interpreted by `sh -c`
    pub line: String,
    /// Working directory for command execution
    pub working_dir: Option<PathBuf>,
    /// Environment variables to set
    pub env: BTreeMap<String, String>,
}

impl ShellCommand {
    /// Create a new command from a shell line
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            working_dir: None,
            env: BTreeMap::new(),
        }
    }

    /// Set the working directory
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

impl From<&str> for ShellCommand {
    fn from(line: &str) -> Self {
        Self::new(line)
    }
}

impl From<String> for ShellCommand {
    fn from(line: String) -> Self {
        Self::new(line)
    }
}

/// Executes shell command lines somewhere.
#[async_trait]
pub trait ShellExecutor: Send + Sync {
    /// Run the command and capture its output, whatever the exit code.
    async fn capture(&self, command: ShellCommand) -> Result<CommandOutput>;

    /// Run the command, failing with [`DockwrightError::CommandFailure`] on a nonzero exit.
    async fn execute(&self, command: ShellCommand) -> Result<CommandOutput> {
        let line = command.line.clone();
        self.capture(command).await?.check(&line)
    }

    /// Executor type name for logging
    fn executor_type(&self) -> &'static str;
}

/// Quote one argument for a POSIX shell.
pub fn quote(arg: &str) -> String {
    shell_escape::unix::escape(arg.into()).into_owned()
}

/// Quote a path for a POSIX shell.
pub fn quote_path(path: &std::path::Path) -> String {
    quote(&path.to_string_lossy())
}
