//! Remote command execution over ssh.
//!
//! [`SshShell`] wraps another executor, rewrites each command line into
//! `ssh <host> '<line>'` and retries connection drops with bounded exponential
//! backoff. Any other failure is returned on the first attempt.

use super::{CommandOutput, ShellCommand, ShellExecutor, quote};
use crate::config::RetryPolicy;
use crate::error::{DockwrightError, Result};
use async_trait::async_trait;
use rand::Rng;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, warn};

static TRANSIENT_SSH_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)connection reset by peer|connection closed by remote host|kex_exchange_identification|connection timed out during banner exchange",
    )
    .expect("static regex is valid")
});

/// Whether stderr from ssh indicates a dropped connection worth retrying.
pub fn is_transient_ssh_error(stderr: &str) -> bool {
    TRANSIENT_SSH_ERROR.is_match(stderr)
}

/// Runs command lines on a remote host through ssh.
#[derive(Clone)]
pub struct SshShell {
    inner: Arc<dyn ShellExecutor>,
    host: String,
    policy: RetryPolicy,
}

impl SshShell {
    /// Create an ssh shell on top of a local executor.
    pub fn new(inner: Arc<dyn ShellExecutor>, host: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            host: host.into(),
            policy,
        }
    }

    /// Remote host name.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The local `ssh ...` line that runs `cmd` remotely.
    pub fn remote_line(&self, cmd: &ShellCommand) -> String {
        let mut remote = String::new();
        if let Some(ref dir) = cmd.working_dir {
            remote.push_str(&format!("cd {} && ", quote(&dir.to_string_lossy())));
        }
        for (key, value) in &cmd.env {
            remote.push_str(&format!("export {}={}; ", key, quote(value)));
        }
        remote.push_str(&cmd.line);
        format!("ssh {} {}", quote(&self.host), quote(&remote))
    }

    fn jittered(&self, attempt: u32) -> Duration {
        let base = self.policy.backoff(attempt);
        let jitter_cap = (base.as_millis() as u64 / 4).max(1);
        let jitter = rand::rng().random_range(0..=jitter_cap);
        base + Duration::from_millis(jitter)
    }
}

#[async_trait]
impl ShellExecutor for SshShell {
    async fn capture(&self, cmd: ShellCommand) -> Result<CommandOutput> {
        let line = self.remote_line(&cmd);
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let output = self.inner.capture(ShellCommand::new(line.clone())).await?;
            if output.success() || !is_transient_ssh_error(&output.stderr) {
                return Ok(output);
            }

            if attempt >= max_attempts {
                return Err(DockwrightError::TransientConnectivity {
                    host: self.host.clone(),
                    attempts: attempt,
                    stderr: output.stderr,
                });
            }

            let delay = self.jittered(attempt);
            warn!(
                "ssh to {} dropped (attempt {}/{}), retrying in {:?}: {}",
                self.host,
                attempt,
                max_attempts,
                delay,
                output.stderr.trim()
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
            debug!("retrying ssh command on {}", self.host);
        }
    }

    fn executor_type(&self) -> &'static str {
        "ssh"
    }
}
