//! # Dockwright
//!
//! Build container images from composable build-step macros, synchronize host
//! data into container mounts, and run shell scripts inside ephemeral or
//! persistent containers on a local or ssh-reachable docker host.
//!
//! ## Architecture Overview
//!
//! - **[`macros`]**: build-step macros and their resolution into a staged
//!   build context with a generated Dockerfile
//! - **[`builder`]**: immutable image recipes, the build-once image builder and
//!   the docker CLI front end
//! - **[`mounts`]**: mount requests and their resolution into `-v` bindings
//! - **[`container`]**: script execution in `docker run --rm` containers and in
//!   long-lived named containers
//! - **[`sync`]**: bounded-concurrency rsync between local and remote paths
//! - **[`shell`]**: the one boundary every external command crosses
//! - **[`workbench`]**: wires all of the above from a [`config::DockwrightConfig`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dockwright::{ContainerSchematic, DockerBuilder, DockwrightConfig, MountRequest, Workbench};
//! use dockwright::storage::StaticStorageResolver;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> dockwright::Result<()> {
//!     let storage = StaticStorageResolver::new().with("models", "/data/models");
//!     let bench = Workbench::from_config(&DockwrightConfig::default(), Arc::new(storage));
//!
//!     let schematic = ContainerSchematic::new(
//!         DockerBuilder::new("python:3.12-slim").add_macro("RUN pip install numpy"),
//!     )
//!     .add(MountRequest::resource("models", "/models"))
//!     .add(MountRequest::cache("pip", "/root/.cache/pip"));
//!
//!     let env = bench.docker_env(&schematic, None);
//!     let output = env.run_script("ls /models").await?;
//!     println!("{}", output.stdout);
//!     Ok(())
//! }
//! ```

/// Image recipes, the image builder and the docker CLI front end.
pub mod builder;

/// Configuration loading and discovery.
pub mod config;

/// Script execution in containers.
pub mod container;

/// Fixed paths and names.
pub mod env;

/// Error taxonomy.
pub mod error;

/// Content hashing and staging names.
pub mod hash;

/// Process-wide keyed locks.
pub mod lock;

/// Build-step macros.
pub mod macros;

/// Mount requests and resolution.
pub mod mounts;

/// Container schematics and their TOML file form.
pub mod schematic;

/// Scoped resources with guaranteed release.
pub mod scope;

/// The shell boundary.
pub mod shell;

/// Storage id resolution.
pub mod storage;

/// Directory synchronization.
pub mod sync;

/// One-stop wiring of every layer from a configuration.
pub mod workbench;

pub use builder::{DockerBuilder, DockerBuilderComponent, ImageBuilder};
pub use config::{ConfigDiscovery, DockwrightConfig};
pub use container::{ContainerState, DockerEnv, PersistentContainer, RunOptions};
pub use error::{DockwrightError, Result};
pub use macros::Macro;
pub use mounts::{DockerMount, MountRequest};
pub use schematic::{ContainerSchematic, SchematicFile};
pub use sync::{RemoteSync, SyncLocation, SyncRequest};
pub use workbench::Workbench;
