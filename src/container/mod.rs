//! # Container Execution
//!
//! Runs scripts inside containers built from a [`crate::schematic::ContainerSchematic`].
//!
//! ## Core Components
//!
//! - **[`DockerEnv`]**: builds the image once, resolves mounts and runs each
//!   script in a fresh `docker run --rm` container
//! - **[`PersistentContainer`]**: keeps one named container alive and runs
//!   scripts in it with `docker exec`; supports file upload, download and delete
//! - **[`transport`]**: the base64 script transport shared by both
//!
//! Both report a failing script as [`crate::DockwrightError::CommandFailure`]
//! carrying the script's own exit code, stdout and stderr, so callers can tell
//! it apart from transport or configuration errors.

use crate::config::DockerSettings;
use crate::shell::quote;

pub mod executor;
pub mod persistent;
pub mod transport;

pub use executor::DockerEnv;
pub use persistent::{ContainerState, PersistentContainer};

/// `docker run` options applied to every container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    /// `--gpus` value
    pub gpus: Option<String>,
    /// `--net` value
    pub network: Option<String>,
    /// `--shm-size` value
    pub shm_size: Option<String>,
    /// Extra raw arguments, inserted verbatim
    pub extra: Vec<String>,
}

impl RunOptions {
    /// Options from the docker settings.
    pub fn from_settings(settings: &DockerSettings) -> Self {
        Self {
            gpus: settings.gpus.clone(),
            network: settings.network.clone(),
            shm_size: settings.shm_size.clone(),
            extra: Vec::new(),
        }
    }

    /// Append a raw argument.
    pub fn with_extra(mut self, arg: impl Into<String>) -> Self {
        self.extra.push(arg.into());
        self
    }

    /// Rendered arguments placed before the mounts.
    pub(crate) fn leading_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(gpus) = &self.gpus {
            args.push(format!("--gpus {}", quote(gpus)));
        }
        if let Some(network) = &self.network {
            args.push(format!("--net={}", quote(network)));
        }
        args
    }

    /// Rendered arguments placed after the mounts.
    pub(crate) fn trailing_args(&self) -> Vec<String> {
        let mut args = self.extra.clone();
        if let Some(shm_size) = &self.shm_size {
            args.push(format!("--shm-size={}", quote(shm_size)));
        }
        args
    }
}

/// Default image tag for a recipe name: `<repo>/<lowercased name>`.
pub fn default_tag(image_repo: &str, recipe_name: &str) -> String {
    format!("{}/{}", image_repo, recipe_name.to_lowercase())
}
