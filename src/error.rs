//! Crate-wide error type.
//!
//! Every failure the orchestration layer can surface maps onto one of these
//! variants. Nothing here is swallowed or downgraded on the way up; callers
//! only ever see added context such as the command line or the target name.

use std::path::PathBuf;

/// Errors raised while building images, syncing data or running scripts.
#[derive(Debug, thiserror::Error)]
pub enum DockwrightError {
    /// An external process exited with a nonzero status.
    #[error("command `{command}` failed with exit code {exit_code}\nstdout: {stdout}\nstderr: {stderr}")]
    CommandFailure {
        /// The command line that was executed
        command: String,
        /// Exit status reported by the process (-1 when killed by a signal)
        exit_code: i32,
        /// Captured standard output
        stdout: String,
        /// Captured standard error
        stderr: String,
    },

    /// The remote shell kept dropping the connection until the retry ceiling was hit.
    #[error("connection to {host} kept failing after {attempts} attempts: {stderr}")]
    TransientConnectivity {
        /// Remote host that could not be reached reliably
        host: String,
        /// Number of attempts made
        attempts: u32,
        /// Stderr of the last attempt
        stderr: String,
    },

    /// Invalid macro, mount or sync configuration. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A scoped resource was entered twice during one resolution.
    #[error("scoped resource entered twice: {0}")]
    Reentrancy(String),

    /// The storage resolver does not know the requested id.
    #[error("could not locate '{id}' (known ids: {known:?})")]
    NotFound {
        /// Requested id
        id: String,
        /// Ids the resolver does know about
        known: Vec<String>,
    },

    /// The staged build context exceeds the configured limit.
    #[error("build context at {} is {size_mb:.1} MB, above the {limit_mb} MB limit", .dir.display())]
    ContextTooLarge {
        /// Staging directory that was measured
        dir: PathBuf,
        /// Measured size in megabytes
        size_mb: f64,
        /// Configured limit in megabytes
        limit_mb: u64,
    },

    /// A persistent container was used after `stop()`.
    #[error("container '{0}' has been stopped")]
    ContainerStopped(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON from the container engine
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed TOML configuration or schematic file
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A background copy/sync task panicked or was aborted
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl DockwrightError {
    /// Build a configuration error from anything displayable.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Exit code of a failed command, if this is a command failure.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::CommandFailure { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }

    /// Stderr captured from a failed command or connection.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::CommandFailure { stderr, .. } | Self::TransientConnectivity { stderr, .. } => {
                Some(stderr)
            }
            _ => None,
        }
    }

    /// Whether this is a command failure, as opposed to a transport or config problem.
    pub fn is_command_failure(&self) -> bool {
        matches!(self, Self::CommandFailure { .. })
    }
}

/// Result type for dockwright operations.
pub type Result<T> = std::result::Result<T, DockwrightError>;
