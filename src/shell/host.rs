//! Native host command execution.
//!
//! Executes command lines through `sh -c` using `tokio::process::Command`,
//! streaming each output line to the log while capturing it.

use super::{CommandOutput, ShellCommand, ShellExecutor};
use crate::error::Result;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info};

/// Executes commands directly on the host system
#[derive(Debug, Clone, Default)]
pub struct HostShell;

impl HostShell {
    /// Create a new host shell
    pub fn new() -> Self {
        Self
    }
}

/// Read a stream to the end, logging each line under `stream_id`.
///
/// Bytes that are not valid UTF-8 are replaced, never rejected.
async fn stream_and_capture<R>(reader: Option<R>, stream_id: &str) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Ok(String::new());
    };

    let mut captured = String::new();
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&line);
        debug!("[{}] {}", stream_id, text.trim_end_matches(['\n', '\r']));
        captured.push_str(&text);
    }
    Ok(captured)
}

fn stream_id(line: &str) -> String {
    let prefix: String = line.chars().take(20).collect();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}#{}", prefix, &suffix[..6])
}

#[async_trait]
impl ShellExecutor for HostShell {
    async fn capture(&self, cmd: ShellCommand) -> Result<CommandOutput> {
        info!("running command => {}", cmd.line);

        let start = Instant::now();

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&cmd.line)
            // A null stdin keeps child processes (ssh in particular) from grabbing the terminal
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = cmd.working_dir {
            command.current_dir(dir);
        }

        for (key, value) in &cmd.env {
            command.env(key, value);
        }

        let mut child = command.spawn()?;
        let id = stream_id(&cmd.line);
        let stdout_id = format!("{}:out", id);
        let stderr_id = format!("{}:err", id);

        let (stdout, stderr) = tokio::try_join!(
            stream_and_capture(child.stdout.take(), &stdout_id),
            stream_and_capture(child.stderr.take(), &stderr_id),
        )?;
        let status = child.wait().await?;

        let exit_code = status.code().unwrap_or(-1);
        if exit_code == 0 {
            info!("command <<{}>> finished with exit code 0", cmd.line);
        } else {
            error!("command <<{}>> failed with exit code {}", cmd.line, exit_code);
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
            duration: start.elapsed(),
        })
    }

    fn executor_type(&self) -> &'static str {
        "host"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DockwrightError;

    #[tokio::test]
    async fn test_host_shell_simple_command() {
        let shell = HostShell::new();

        let result = shell.execute(ShellCommand::new("echo hello")).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "hello\n");
        assert!(result.success());
    }

    #[tokio::test]
    async fn test_host_shell_multiline_and_stderr() {
        let shell = HostShell::new();

        let result = shell
            .execute(ShellCommand::new("echo one; echo two; echo oops >&2"))
            .await
            .unwrap();
        assert_eq!(result.stdout, "one\ntwo\n");
        assert_eq!(result.stderr, "oops\n");
    }

    #[tokio::test]
    async fn test_host_shell_working_directory() {
        let shell = HostShell::new();
        let dir = tempfile::tempdir().unwrap();

        let result = shell
            .execute(ShellCommand::new("pwd").with_working_dir(dir.path()))
            .await
            .unwrap();
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(result.stdout.trim(), expected.to_string_lossy());
    }

    #[tokio::test]
    async fn test_host_shell_environment_variable() {
        let shell = HostShell::new();

        let result = shell
            .execute(ShellCommand::new("echo $TEST_VAR").with_env("TEST_VAR", "hello"))
            .await
            .unwrap();
        assert!(result.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_capture_keeps_nonzero_exit() {
        let shell = HostShell::new();

        let result = shell.capture(ShellCommand::new("exit 3")).await.unwrap();
        assert_eq!(result.exit_code, 3);
        assert!(!result.success());
    }

    #[tokio::test]
    async fn test_execute_raises_command_failure() {
        let shell = HostShell::new();

        let err = shell
            .execute(ShellCommand::new("echo out; echo err >&2; exit 1"))
            .await
            .unwrap_err();
        match err {
            DockwrightError::CommandFailure {
                exit_code,
                stdout,
                stderr,
                ..
            } => {
                assert_eq!(exit_code, 1);
                assert_eq!(stdout, "out\n");
                assert_eq!(stderr, "err\n");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_capture_tolerates_invalid_utf8() {
        let shell = HostShell::new();

        let result = shell
            .capture(ShellCommand::new("printf 'ok\\377\\n'; printf 'bad\\376' >&2; exit 4"))
            .await
            .unwrap();
        assert_eq!(result.exit_code, 4);
        assert_eq!(result.stdout, "ok\u{FFFD}\n");
        assert_eq!(result.stderr, "bad\u{FFFD}");
    }

    #[tokio::test]
    async fn test_output_without_trailing_newline_is_kept_verbatim() {
        let shell = HostShell::new();

        let result = shell.execute(ShellCommand::new("printf 'a\\nb'")).await.unwrap();
        assert_eq!(result.stdout, "a\nb");
    }

    #[test]
    fn test_executor_type() {
        assert_eq!(HostShell::new().executor_type(), "host");
    }
}
