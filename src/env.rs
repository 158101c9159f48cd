//! Environment constants and path utilities.
//!
//! Centralizes the fixed in-container paths, default host placement roots and
//! configuration file names used throughout the crate.

use std::path::{Path, PathBuf};

/// Hidden per-project directory name
pub const DOCKWRIGHT_DIR_NAME: &str = ".dockwright";

/// Configuration file name inside [`DOCKWRIGHT_DIR_NAME`]
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Top-level configuration file name in the current directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "dockwright.toml";

/// Paths baked into every image built by this crate
pub mod container {
    /// Where the base64 runner script is installed
    pub const RUNNER_PATH: &str = "/usr/local/bin/base64_runner.sh";

    /// Where the entrypoint script is installed
    pub const ENTRYPOINT_PATH: &str = "/entrypoint.sh";

    /// Stage name used in the generated `FROM` line
    pub const BASE_STAGE_NAME: &str = "base";

    /// File name of the generated image definition inside a staging directory
    pub const DOCKERFILE_NAME: &str = "Dockerfile";
}

/// Default placement roots on the docker host
pub mod placement {
    /// Root for cache mounts
    pub const CACHE_ROOT: &str = "/tmp/dockwright/cache";

    /// Root for resolved resource mounts
    pub const RESOURCE_ROOT: &str = "/tmp/dockwright/resources";

    /// Root for resolved source mounts
    pub const SOURCE_ROOT: &str = "/tmp/dockwright/sources";

    /// Root for direct and contextual mounts
    pub const DIRECT_ROOT: &str = "/tmp/dockwright/direct";

    /// Prefix of remote build-context directories for ssh builds
    pub const REMOTE_BUILD_PREFIX: &str = "/tmp/docker-build-";

    /// Prefix of host-side staging paths for persistent-container transfers
    pub const TRANSFER_PREFIX: &str = "/tmp/dockwright-transfer-";
}

/// Build the per-project dockwright directory path
pub fn dockwright_dir_path(project_root: &Path) -> PathBuf {
    project_root.join(DOCKWRIGHT_DIR_NAME)
}

/// Build config file path in user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    dockwright_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// Build local config file path in the project's hidden directory
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    dockwright_dir_path(current_dir).join(CONFIG_FILE_NAME)
}

/// Build the top-level local config file path
pub fn top_level_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(LOCAL_CONFIG_FILE_NAME)
}
