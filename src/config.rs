//! Configuration loading and discovery.
//!
//! Configuration is looked up in this order:
//! 1. Current directory: `./dockwright.toml` or `./.dockwright/config.toml`
//! 2. User config: `~/.dockwright/config.toml`
//! 3. System config: `/etc/dockwright/config.toml`
//! 4. Built-in defaults
//!
//! Every section is optional in the file; missing keys fall back to defaults.

use crate::env;
use crate::error::Result;
use crate::mounts::HostPlacement;
use serde::{Deserialize, Serialize};
use std::env as std_env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DockwrightConfig {
    /// Container engine settings
    pub docker: DockerSettings,
    /// Where mount data lives on the docker host
    pub placement: HostPlacement,
    /// Directory synchronization limits
    pub sync: SyncSettings,
    /// Build-context checks
    pub build: BuildSettings,
    /// Remote shell retry policy
    pub ssh: RetryPolicy,
    /// Persistent container polling
    pub persistent: PersistentSettings,
}

impl DockwrightConfig {
    /// Load from a TOML file.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Render as pretty TOML.
    pub fn to_toml_string(&self) -> String {
        // Every field is a plain serde type, serialization cannot fail.
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

/// Container engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DockerSettings {
    /// Remote docker host reached over ssh (None = local daemon)
    pub host: Option<String>,
    /// Named docker context (`docker --context <name>`)
    pub context: Option<String>,
    /// Repository prefix for generated image tags
    pub image_repo: String,
    /// Target platform passed to `docker build --platform`
    pub platform: Option<String>,
    /// Network mode for `docker run --net`
    pub network: Option<String>,
    /// Shared memory size for `docker run --shm-size`
    pub shm_size: Option<String>,
    /// GPU request for `docker run --gpus` (e.g. "all")
    pub gpus: Option<String>,
    /// Use the engine's layer cache when building
    pub use_cache: bool,
    /// Run `docker history` after each build
    pub debug_history: bool,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            host: None,
            context: None,
            image_repo: "dockwright".to_string(),
            platform: Some("linux/amd64".to_string()),
            network: Some("host".to_string()),
            shm_size: Some("10g".to_string()),
            gpus: None,
            use_cache: true,
            debug_history: false,
        }
    }
}

/// Directory synchronization limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncSettings {
    /// Maximum number of concurrent rsync invocations in this process
    pub concurrency: usize,
    /// Maximum number of concurrent helper commands (mkdir) on the docker host
    pub host_command_concurrency: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            concurrency: 3,
            host_command_concurrency: 5,
        }
    }
}

/// What to do when a staged build context is larger than the limit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OversizedContextPolicy {
    /// Log a warning and continue
    #[default]
    Warn,
    /// Fail the build with [`crate::DockwrightError::ContextTooLarge`]
    Error,
}

/// Build-context checks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BuildSettings {
    /// Size above which the staged context is reported, in megabytes
    pub context_size_limit_mb: u64,
    /// Reaction to an oversized context
    pub oversized_context: OversizedContextPolicy,
    /// Files at or above this size are listed before each build, in megabytes
    pub large_file_threshold_mb: u64,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            context_size_limit_mb: 50,
            oversized_context: OversizedContextPolicy::Warn,
            large_file_threshold_mb: 1,
        }
    }
}

/// Bounded retry policy for transient remote-shell failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay, in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 250,
            max_backoff_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1).min(16));
        let millis = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

/// Persistent container polling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PersistentSettings {
    /// Fixed readiness poll interval, in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for PersistentSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
        }
    }
}

impl PersistentSettings {
    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Discover and load configuration using the hierarchy
    pub fn discover_config() -> Result<DockwrightConfig> {
        if let Some(config_path) = Self::find_config_file() {
            info!("Loading configuration from: {:?}", config_path);
            return DockwrightConfig::from_toml_file(config_path);
        }

        info!("No configuration file found, using defaults");
        Ok(DockwrightConfig::default())
    }

    /// Find configuration file using discovery hierarchy
    pub fn find_config_file() -> Option<PathBuf> {
        for candidate in Self::config_candidates() {
            debug!("Checking for config file: {:?}", candidate);
            if candidate.is_file() {
                debug!("Found config file: {:?}", candidate);
                return Some(candidate);
            }
        }

        debug!("No config file found in discovery hierarchy");
        None
    }

    /// Configuration file candidates in priority order
    fn config_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Ok(current_dir) = std_env::current_dir() {
            candidates.push(env::top_level_config_file_path(&current_dir));
            candidates.push(env::local_config_file_path(&current_dir));
        }

        if let Some(home_dir) = Self::home_dir() {
            candidates.push(env::user_config_file_path(&home_dir));
        }

        #[cfg(unix)]
        candidates.push(PathBuf::from("/etc/dockwright/config.toml"));

        candidates
    }

    fn home_dir() -> Option<PathBuf> {
        std_env::var("HOME")
            .ok()
            .or_else(|| std_env::var("USERPROFILE").ok())
            .map(PathBuf::from)
    }
}
