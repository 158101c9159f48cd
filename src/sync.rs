//! Directory synchronization over rsync.
//!
//! [`RemoteSync`] turns a [`SyncRequest`] into one `rsync` invocation executed
//! through the shell boundary. All invocations issued through one `RemoteSync`
//! share a single counting semaphore, so the many syncs started by mount
//! resolution and macro staging cannot flood the network or the disk.

use crate::error::{DockwrightError, Result};
use crate::shell::{ShellCommand, ShellExecutor, quote};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};

/// Default number of concurrent rsync processes.
pub const DEFAULT_SYNC_CONCURRENCY: usize = 3;

/// A path on a specific host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyncLocation {
    /// Path on the host
    pub path: PathBuf,
    /// Host name, `localhost` for this machine
    pub host: String,
    /// Optional remote user
    pub user: Option<String>,
}

impl SyncLocation {
    /// A path on this machine.
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            host: "localhost".to_string(),
            user: None,
        }
    }

    /// A path on a remote host.
    pub fn remote(host: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            host: host.into(),
            user: None,
        }
    }

    /// Set the remote user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Whether this location is on this machine.
    pub fn is_local(&self) -> bool {
        self.host == "localhost" && self.user.is_none()
    }

    /// Parse `host:path` or a plain local path.
    pub fn parse(spec: &str) -> Self {
        match spec.split_once(':') {
            Some((host, path)) if !host.is_empty() && !host.contains('/') => {
                Self::remote(host, path)
            }
            _ => Self::local(spec),
        }
    }

    /// rsync operand form: `user@host:path`, `host:path` or a local path.
    pub fn to_rsync_arg(&self) -> String {
        let path = self.path.to_string_lossy();
        match (&self.user, self.host.as_str()) {
            (Some(user), host) => format!("{}@{}:{}", user, host, path),
            (None, "localhost") => path.into_owned(),
            (None, host) => format!("{}:{}", host, path),
        }
    }
}

impl fmt::Display for SyncLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rsync_arg())
    }
}

impl From<PathBuf> for SyncLocation {
    fn from(path: PathBuf) -> Self {
        Self::local(path)
    }
}

impl From<&Path> for SyncLocation {
    fn from(path: &Path) -> Self {
        Self::local(path)
    }
}

/// One directory synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyncRequest {
    /// Source directory
    pub src: SyncLocation,
    /// Destination directory
    pub dst: SyncLocation,
    /// Patterns excluded from the transfer
    pub excludes: Vec<String>,
    /// Patterns explicitly included
    pub includes: Vec<String>,
    /// Extra rsync options, e.g. `--delete`
    pub options: Vec<String>,
    /// Reuse unchanged files from the source as hardlinks (`--link-dest`)
    pub hardlink: bool,
}

impl SyncRequest {
    /// Plain sync from `src` to `dst`.
    pub fn new(src: impl Into<SyncLocation>, dst: impl Into<SyncLocation>) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
            excludes: Vec::new(),
            includes: Vec::new(),
            options: Vec::new(),
            hardlink: false,
        }
    }

    /// Add exclude patterns; duplicates are dropped.
    pub fn with_excludes<I, S>(mut self, excludes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for exclude in excludes {
            let exclude = exclude.into();
            if !self.excludes.contains(&exclude) {
                self.excludes.push(exclude);
            }
        }
        self
    }

    /// Add include patterns.
    pub fn with_includes<I, S>(mut self, includes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.includes.extend(includes.into_iter().map(Into::into));
        self
    }

    /// Add an rsync option.
    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    /// Mirror the source exactly, deleting stale files at the destination.
    pub fn mirror(self) -> Self {
        self.with_option("--delete")
    }

    /// Enable hardlink reuse.
    pub fn hardlinked(mut self, hardlink: bool) -> Self {
        self.hardlink = hardlink;
        self
    }

    /// Same request with another destination.
    pub fn retarget(&self, dst: impl Into<SyncLocation>) -> Self {
        Self {
            dst: dst.into(),
            ..self.clone()
        }
    }

    /// Reject requests that cannot be executed as stated.
    pub fn validate(&self) -> Result<()> {
        if self.hardlink && self.src.host != self.dst.host {
            return Err(DockwrightError::config(format!(
                "hardlinking only works when source and destination are on the same host (src: {}, dst: {})",
                self.src, self.dst
            )));
        }
        Ok(())
    }

    /// rsync filter rules: includes first, then excludes.
    pub fn filter_rules(&self) -> String {
        let mut rules = String::new();
        for include in &self.includes {
            rules.push_str(&format!("+ {}\n", include));
        }
        for exclude in &self.excludes {
            rules.push_str(&format!("- {}\n", exclude));
        }
        rules
    }

    /// The rsync command line using `filter_file` for the filter rules.
    pub fn command_line(&self, filter_file: &Path) -> String {
        let mut parts = vec!["rsync".to_string(), "-avH".to_string()];
        if self.hardlink {
            parts.push(format!("--link-dest={}", quote(&self.src.path.to_string_lossy())));
        }
        parts.push(quote(&format!("{}/", self.src.to_rsync_arg())));
        parts.push(quote(&format!("{}/", self.dst.to_rsync_arg())));
        parts.extend(self.options.iter().map(|option| quote(option)));
        parts.push(quote(&format!("--filter=merge {}", filter_file.to_string_lossy())));
        parts.join(" ")
    }
}

/// Runs rsync with a process-wide concurrency bound.
#[derive(Clone)]
pub struct RemoteSync {
    shell: Arc<dyn ShellExecutor>,
    permits: Arc<Semaphore>,
}

impl RemoteSync {
    /// Create a sync runner allowing `concurrency` simultaneous transfers.
    pub fn new(shell: Arc<dyn ShellExecutor>, concurrency: usize) -> Self {
        Self {
            shell,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Currently free transfer slots.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Execute one synchronization.
    ///
    /// The request is validated before anything runs; the temporary filter
    /// file is removed when the call returns, whatever the outcome.
    pub async fn sync(&self, request: &SyncRequest) -> Result<()> {
        request.validate()?;

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| DockwrightError::config("sync semaphore closed"))?;

        let filter_dir = tempfile::Builder::new().prefix("dockwright-filter-").tempdir()?;
        let filter_file = filter_dir.path().join("filter.txt");
        fs::write(&filter_file, request.filter_rules())?;

        let line = request.command_line(&filter_file);
        info!("syncing {} -> {}", request.src, request.dst);
        debug!("rsync command: {}", line);
        self.shell.execute(ShellCommand::new(line)).await?;
        Ok(())
    }
}
