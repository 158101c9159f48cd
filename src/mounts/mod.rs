//! # Mounts
//!
//! A [`MountRequest`] declares that some host data should be visible inside a
//! container. [`MountResolver`] turns requests into concrete [`DockerMount`]
//! bindings by placing the data on the docker host under a [`HostPlacement`]
//! root and syncing it there.
//!
//! | Request      | Host directory                       | Data transfer           |
//! |--------------|--------------------------------------|-------------------------|
//! | `Cache`      | `cache_root/<name>`                  | none, directory only    |
//! | `Resolve`    | `resource_root/<id>` or `source_root/<id>` | mirrored (`--delete`) |
//! | `Direct`     | `direct_root/<hash of source path>`  | synced                  |
//! | `Contextual` | `direct_root/<hash of mount point>`  | synced, scope closed after |

use crate::env::placement::{CACHE_ROOT, DIRECT_ROOT, RESOURCE_ROOT, SOURCE_ROOT};
use crate::scope::ScopedResource;
use crate::shell::quote;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod resolver;

pub use resolver::MountResolver;

/// Which placement root a resolved id lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountKind {
    /// Data such as datasets or model weights
    Resource,
    /// Project source trees
    Source,
}

/// Declared intent for host data inside a container.
#[derive(Clone)]
pub enum MountRequest {
    /// A persistent directory on the docker host; nothing is copied
    Cache {
        /// Subdirectory name under the cache root
        name: String,
        /// Path inside the container
        mount_point: PathBuf,
    },
    /// An id located through the storage resolver
    Resolve {
        /// Placement root to use
        kind: MountKind,
        /// Logical id
        id: String,
        /// Path inside the container
        mount_point: PathBuf,
        /// Patterns left out of the sync
        excludes: Vec<String>,
    },
    /// A host path given directly
    Direct {
        /// Host path
        source: PathBuf,
        /// Path inside the container
        mount_point: PathBuf,
        /// Patterns left out of the sync
        excludes: Vec<String>,
    },
    /// A host path that exists only while a scoped resource is open
    Contextual {
        /// Yields the host path
        source: Arc<dyn ScopedResource<PathBuf>>,
        /// Path inside the container
        mount_point: PathBuf,
        /// Patterns left out of the sync
        excludes: Vec<String>,
    },
}

impl MountRequest {
    /// Cache mount.
    pub fn cache(name: impl Into<String>, mount_point: impl Into<PathBuf>) -> Self {
        Self::Cache {
            name: name.into(),
            mount_point: mount_point.into(),
        }
    }

    /// Resource mount resolved by id.
    pub fn resource(id: impl Into<String>, mount_point: impl Into<PathBuf>) -> Self {
        Self::Resolve {
            kind: MountKind::Resource,
            id: id.into(),
            mount_point: mount_point.into(),
            excludes: Vec::new(),
        }
    }

    /// Source mount resolved by id.
    pub fn source(id: impl Into<String>, mount_point: impl Into<PathBuf>) -> Self {
        Self::Resolve {
            kind: MountKind::Source,
            id: id.into(),
            mount_point: mount_point.into(),
            excludes: Vec::new(),
        }
    }

    /// Direct mount of a host path.
    pub fn direct(source: impl Into<PathBuf>, mount_point: impl Into<PathBuf>) -> Self {
        Self::Direct {
            source: source.into(),
            mount_point: mount_point.into(),
            excludes: Vec::new(),
        }
    }

    /// Mount of a path produced by a scoped resource.
    pub fn contextual(
        source: Arc<dyn ScopedResource<PathBuf>>,
        mount_point: impl Into<PathBuf>,
    ) -> Self {
        Self::Contextual {
            source,
            mount_point: mount_point.into(),
            excludes: Vec::new(),
        }
    }

    /// Add exclude patterns; ignored for cache mounts.
    pub fn with_excludes<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match &mut self {
            Self::Cache { .. } => {}
            Self::Resolve { excludes, .. }
            | Self::Direct { excludes, .. }
            | Self::Contextual { excludes, .. } => {
                excludes.extend(patterns.into_iter().map(Into::into));
            }
        }
        self
    }

    /// Path inside the container.
    pub fn mount_point(&self) -> &Path {
        match self {
            Self::Cache { mount_point, .. }
            | Self::Resolve { mount_point, .. }
            | Self::Direct { mount_point, .. }
            | Self::Contextual { mount_point, .. } => mount_point,
        }
    }
}

impl fmt::Debug for MountRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cache { name, mount_point } => f
                .debug_struct("Cache")
                .field("name", name)
                .field("mount_point", mount_point)
                .finish(),
            Self::Resolve {
                kind,
                id,
                mount_point,
                excludes,
            } => f
                .debug_struct("Resolve")
                .field("kind", kind)
                .field("id", id)
                .field("mount_point", mount_point)
                .field("excludes", excludes)
                .finish(),
            Self::Direct {
                source,
                mount_point,
                excludes,
            } => f
                .debug_struct("Direct")
                .field("source", source)
                .field("mount_point", mount_point)
                .field("excludes", excludes)
                .finish(),
            Self::Contextual {
                source,
                mount_point,
                excludes,
            } => f
                .debug_struct("Contextual")
                .field("source", &source.describe())
                .field("mount_point", mount_point)
                .field("excludes", excludes)
                .finish(),
        }
    }
}

/// A resolved host directory to container path binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DockerMount {
    /// Directory on the docker host
    pub source: PathBuf,
    /// Path inside the container
    pub target: PathBuf,
}

impl DockerMount {
    /// Create a binding.
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    /// `-v source:target` argument.
    pub fn volume_arg(&self) -> String {
        format!(
            "-v {}",
            quote(&format!("{}:{}", self.source.display(), self.target.display()))
        )
    }
}

/// Placement roots on the docker host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostPlacement {
    /// Root for cache mounts
    pub cache_root: PathBuf,
    /// Root for resource mounts
    pub resource_root: PathBuf,
    /// Root for source mounts
    pub source_root: PathBuf,
    /// Root for direct and contextual mounts
    pub direct_root: PathBuf,
}

impl Default for HostPlacement {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from(CACHE_ROOT),
            resource_root: PathBuf::from(RESOURCE_ROOT),
            source_root: PathBuf::from(SOURCE_ROOT),
            direct_root: PathBuf::from(DIRECT_ROOT),
        }
    }
}

impl HostPlacement {
    /// Root directory for a resolved kind.
    pub fn root_for(&self, kind: MountKind) -> &Path {
        match kind {
            MountKind::Resource => &self.resource_root,
            MountKind::Source => &self.source_root,
        }
    }
}
