//! # Wiring
//!
//! [`Workbench`] assembles the shell boundary, the synchronizer, the macro
//! resolver, the docker engine and the mount resolver from one
//! [`DockwrightConfig`], and hands out execution environments for schematics.
//!
//! ```text
//! ┌──────────────────────────── Workbench ─────────────────────────────┐
//! │  HostShell ──► SshShell (when docker.host is set)                 │
//! │      │              │                                             │
//! │  RemoteSync    DockerEngine ◄── ImageBuilder ◄── MacroResolver    │
//! │      └──────────────┴──────► MountResolver ◄── StorageResolver    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

use crate::builder::{DockerEngine, DockerHost, ImageBuilder};
use crate::config::DockwrightConfig;
use crate::container::{DockerEnv, PersistentContainer, RunOptions};
use crate::macros::MacroResolver;
use crate::mounts::MountResolver;
use crate::schematic::ContainerSchematic;
use crate::shell::{HostShell, ShellExecutor, SshShell};
use crate::storage::StorageResolver;
use crate::sync::RemoteSync;
use std::sync::Arc;
use tracing::info;

/// Everything needed to build images and run containers for one docker host.
#[derive(Clone)]
pub struct Workbench {
    config: DockwrightConfig,
    images: ImageBuilder,
    mounts: MountResolver,
}

impl Workbench {
    /// Wire the components from configuration.
    pub fn from_config(config: &DockwrightConfig, storage: Arc<dyn StorageResolver>) -> Self {
        let local: Arc<dyn ShellExecutor> = Arc::new(HostShell::new());
        Self::with_local_shell(config, storage, local)
    }

    /// Wire the components around a given local executor.
    pub fn with_local_shell(
        config: &DockwrightConfig,
        storage: Arc<dyn StorageResolver>,
        local: Arc<dyn ShellExecutor>,
    ) -> Self {
        let docker = &config.docker;
        let host = DockerHost::from_settings(docker.host.as_deref(), docker.context.as_deref());
        let remote: Arc<dyn ShellExecutor> = match &host {
            DockerHost::Ssh(name) => {
                info!("docker host is {} over ssh", name);
                Arc::new(SshShell::new(Arc::clone(&local), name.clone(), config.ssh.clone()))
            }
            DockerHost::Context(context) => {
                info!("docker host is context {}", context);
                Arc::clone(&local)
            }
            DockerHost::Local => Arc::clone(&local),
        };

        let sync = RemoteSync::new(Arc::clone(&local), config.sync.concurrency);
        let engine = DockerEngine::new(host, Arc::clone(&local), remote, sync.clone());
        let resolver = MacroResolver::new(local, sync.clone(), config.build.clone());
        let images = ImageBuilder::new(resolver, engine.clone())
            .with_cache(docker.use_cache)
            .with_history(docker.debug_history);
        let mounts = MountResolver::new(
            engine,
            sync,
            storage,
            config.placement.clone(),
            config.sync.host_command_concurrency,
        );

        Self {
            config: config.clone(),
            images,
            mounts,
        }
    }

    /// The configuration this workbench was built from.
    pub fn config(&self) -> &DockwrightConfig {
        &self.config
    }

    /// The image builder.
    pub fn images(&self) -> &ImageBuilder {
        &self.images
    }

    /// The mount resolver.
    pub fn mounts(&self) -> &MountResolver {
        &self.mounts
    }

    /// The docker engine.
    pub fn engine(&self) -> &DockerEngine {
        self.images.engine()
    }

    fn run_options(&self) -> RunOptions {
        RunOptions::from_settings(&self.config.docker)
    }

    /// Ephemeral execution environment for `schematic`.
    pub fn docker_env(&self, schematic: &ContainerSchematic, tag: Option<String>) -> DockerEnv {
        DockerEnv::new(
            self.images.clone(),
            self.mounts.clone(),
            schematic,
            &self.config.docker.image_repo,
            tag,
            self.run_options(),
        )
    }

    /// Persistent container named `name` running `schematic`.
    pub fn persistent(
        &self,
        schematic: &ContainerSchematic,
        name: &str,
        tag: Option<String>,
    ) -> PersistentContainer {
        let container = PersistentContainer::new(
            name,
            self.images.clone(),
            self.mounts.clone(),
            schematic,
            &self.config.docker.image_repo,
            self.run_options(),
            self.config.persistent.poll_interval(),
        );
        match tag {
            Some(tag) => container.with_tag(tag),
            None => container,
        }
    }
}
