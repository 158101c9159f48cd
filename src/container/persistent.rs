//! Long-lived containers.
//!
//! A [`PersistentContainer`] keeps one named container running and reuses it
//! across many script invocations. Its state is never trusted across calls:
//! every [`PersistentContainer::ensure_ready`] re-reads the container list from
//! the engine and matches the `Names` field exactly.
//!
//! ```text
//! NotCreated --run -d--> Starting --exec true ok--> Ready
//!      ^                    ^                         |
//!      |        (exited) docker start                 |
//!      +------------------------ stop() --------------+--> Stopped (terminal)
//! ```

use super::transport::{compose_script, interpret, run_args, runner_command, script_label};
use super::{RunOptions, default_tag};
use crate::builder::{DockerBuilder, ImageBuilder};
use crate::env::placement::TRANSFER_PREFIX;
use crate::error::{DockwrightError, Result};
use crate::macros::runner::install_runner;
use crate::mounts::{MountRequest, MountResolver};
use crate::schematic::ContainerSchematic;
use crate::shell::{CommandOutput, ShellCommand, quote, quote_path};
use crate::sync::{SyncLocation, SyncRequest};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Lifecycle state of a persistent container as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// No container with this name exists
    NotCreated,
    /// Launched or restarted, not answering yet
    Starting,
    /// Answering `docker exec`
    Ready,
    /// Stopped through this handle; terminal
    Stopped,
}

/// A named container reused across script runs.
pub struct PersistentContainer {
    name: String,
    images: ImageBuilder,
    mounts: MountResolver,
    recipe: DockerBuilder,
    mount_requests: Vec<MountRequest>,
    tag: String,
    options: RunOptions,
    poll_interval: Duration,
    state: Mutex<ContainerState>,
}

impl PersistentContainer {
    /// Create a handle for the container `name` running `schematic`.
    pub fn new(
        name: impl Into<String>,
        images: ImageBuilder,
        mounts: MountResolver,
        schematic: &ContainerSchematic,
        image_repo: &str,
        options: RunOptions,
        poll_interval: Duration,
    ) -> Self {
        let recipe = schematic.builder.add_macro(install_runner());
        let tag = default_tag(image_repo, &recipe.name);
        Self {
            name: name.into(),
            images,
            mounts,
            recipe,
            mount_requests: schematic.mount_requests.clone(),
            tag,
            options,
            poll_interval,
            state: Mutex::new(ContainerState::NotCreated),
        }
    }

    /// Use a specific image tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Container name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last observed state.
    pub async fn state(&self) -> ContainerState {
        *self.state.lock().await
    }

    /// Make sure the container exists, runs and answers.
    ///
    /// Readiness is polled at a fixed interval without a limit; wrap the call
    /// in `tokio::time::timeout` to bound the wait.
    pub async fn ensure_ready(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state == ContainerState::Stopped {
            return Err(DockwrightError::ContainerStopped(self.name.clone()));
        }

        let image = self.images.build(&self.recipe, &self.tag).await?;
        let mounts = self.mounts.resolve(&self.mount_requests).await?;

        match self.images.engine().find_container(&self.name).await? {
            Some(found) if found.is_running() => {
                debug!("container {} is running", self.name);
            }
            Some(found) => {
                warn!("container {} is {}, starting it", self.name, found.state);
                self.images.engine().start(&self.name).await?;
                *state = ContainerState::Starting;
            }
            None => {
                info!("launching container {} from {}", self.name, image);
                let lifecycle = vec!["-d".to_string(), format!("--name {}", quote(&self.name))];
                let args = run_args(
                    &self.options,
                    &mounts,
                    &lifecycle,
                    &image,
                    &runner_command("sleep infinity"),
                );
                self.images
                    .engine()
                    .run(&args)
                    .await?
                    .check(&format!("launch container {}", self.name))?;
                *state = ContainerState::Starting;
            }
        }

        self.wait_ready().await?;
        *state = ContainerState::Ready;
        Ok(())
    }

    async fn wait_ready(&self) -> Result<()> {
        loop {
            let readiness = self.images.engine().exec(&self.name, "true").await?;
            if readiness.success() {
                info!("container {} is ready", self.name);
                return Ok(());
            }
            debug!("container {} not ready yet: {}", self.name, readiness.stderr.trim());
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Run `script` after the init scripts inside the container.
    pub async fn run(&self, script: &str) -> Result<CommandOutput> {
        self.ensure_ready().await?;
        let label = script_label(script);
        info!("running `{}` in container {}", label, self.name);

        let full = compose_script(&self.recipe.scripts, script);
        let output = self
            .images
            .engine()
            .exec(&self.name, &runner_command(&full))
            .await?;
        interpret(output, &label)
    }

    /// Copy a local file or directory to `remote` inside the container,
    /// creating the parent directory first.
    pub async fn upload(&self, local: &Path, remote: &Path) -> Result<()> {
        self.ensure_ready().await?;
        let engine = self.images.engine();
        if let Some(parent) = remote.parent() {
            engine
                .exec(&self.name, &format!("mkdir -p {}", quote_path(parent)))
                .await?
                .check(&format!("mkdir -p {}", parent.display()))?;
        }

        let target = format!("{}:{}", self.name, remote.display());
        match engine.ssh_host() {
            None => engine.cp(&local.to_string_lossy(), &target).await,
            Some(host) => {
                let staged = self.transfer_path(local);
                self.host_command(&format!("mkdir -p {}", quote_path(staging_parent(&staged))))
                    .await?;
                let pushed = async {
                    self.local_command(&format!(
                        "scp -r {} {}",
                        quote_path(local),
                        quote(&format!("{}:{}", host, staged.display()))
                    ))
                    .await?;
                    engine.cp(&staged.to_string_lossy(), &target).await
                }
                .await;
                self.cleanup_transfer(&staged).await;
                pushed
            }
        }
    }

    /// Copy `remote` from the container to a local path.
    pub async fn download(&self, remote: &Path, local: &Path) -> Result<()> {
        self.ensure_ready().await?;
        let engine = self.images.engine();
        let source = format!("{}:{}", self.name, remote.display());
        match engine.ssh_host() {
            None => engine.cp(&source, &local.to_string_lossy()).await,
            Some(host) => {
                let staged = self.transfer_path(remote);
                self.host_command(&format!("mkdir -p {}", quote_path(staging_parent(&staged))))
                    .await?;
                let pulled = async {
                    engine.cp(&source, &staged.to_string_lossy()).await?;
                    self.local_command(&format!(
                        "scp -r {} {}",
                        quote(&format!("{}:{}", host, staged.display())),
                        quote_path(local)
                    ))
                    .await
                }
                .await;
                self.cleanup_transfer(&staged).await;
                pulled
            }
        }
    }

    /// Incrementally copy the contents of the local directory `local` into
    /// `remote` inside the container. The image must ship rsync.
    pub async fn sync_to(&self, local: &Path, remote: &Path) -> Result<()> {
        self.ensure_ready().await?;
        let request = self.container_sync(
            SyncLocation::local(local),
            SyncLocation::remote(self.name.clone(), remote),
        );
        self.images.engine().sync().sync(&request).await
    }

    /// Incrementally copy the contents of `remote` inside the container into
    /// the local directory `local`.
    pub async fn sync_from(&self, remote: &Path, local: &Path) -> Result<()> {
        self.ensure_ready().await?;
        let request = self.container_sync(
            SyncLocation::remote(self.name.clone(), remote),
            SyncLocation::local(local),
        );
        self.images.engine().sync().sync(&request).await
    }

    fn container_sync(&self, src: SyncLocation, dst: SyncLocation) -> SyncRequest {
        let rsh = self.images.engine().container_rsh();
        debug!("syncing {} -> {} through `{}`", src, dst, rsh);
        SyncRequest::new(src, dst).with_option(format!("--rsh={}", rsh))
    }

    /// Remove a path inside the container.
    pub async fn delete(&self, remote: &Path) -> Result<()> {
        self.ensure_ready().await?;
        self.images
            .engine()
            .exec(&self.name, &format!("rm -rf {}", quote_path(remote)))
            .await?
            .check(&format!("rm -rf {}", remote.display()))?;
        Ok(())
    }

    /// Stop the container. Terminal for this handle; calling it again is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state == ContainerState::Stopped {
            return Ok(());
        }
        info!("stopping container {}", self.name);
        let engine = self.images.engine();
        if engine.find_container(&self.name).await?.is_some() {
            engine.stop(&self.name).await?;
        }
        *state = ContainerState::Stopped;
        Ok(())
    }

    fn transfer_path(&self, path: &Path) -> PathBuf {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "payload".to_string());
        PathBuf::from(format!("{}{}", TRANSFER_PREFIX, &id[..8])).join(file_name)
    }

    async fn host_command(&self, line: &str) -> Result<()> {
        self.images
            .engine()
            .host_shell()
            .execute(ShellCommand::new(line))
            .await?;
        Ok(())
    }

    async fn local_command(&self, line: &str) -> Result<()> {
        self.images
            .engine()
            .local_shell()
            .execute(ShellCommand::new(line))
            .await?;
        Ok(())
    }

    async fn cleanup_transfer(&self, staged: &Path) {
        let dir = staging_parent(staged);
        if let Err(e) = self.host_command(&format!("rm -rf {}", quote_path(dir))).await {
            warn!("failed to remove transfer directory {}: {}", dir.display(), e);
        }
    }
}

fn staging_parent(staged: &Path) -> &Path {
    staged.parent().unwrap_or(staged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{DockerEngine, DockerHost};
    use crate::config::BuildSettings;
    use crate::lock::KeyedLock;
    use crate::macros::MacroResolver;
    use crate::mounts::HostPlacement;
    use crate::shell::testing::RecordingShell;
    use crate::storage::StaticStorageResolver;
    use crate::sync::RemoteSync;
    use std::sync::Arc;

    fn container(shell: Arc<RecordingShell>, host: DockerHost) -> PersistentContainer {
        let sync = RemoteSync::new(shell.clone(), 3);
        let engine = DockerEngine::new(host, shell.clone(), shell.clone(), sync.clone());
        let resolver = MacroResolver::new(shell, sync.clone(), BuildSettings::default())
            .with_locks(Arc::new(KeyedLock::new()));
        let mounts = MountResolver::new(
            engine.clone(),
            sync,
            Arc::new(StaticStorageResolver::new()),
            HostPlacement::default(),
            5,
        );
        PersistentContainer::new(
            "dev",
            ImageBuilder::new(resolver, engine),
            mounts,
            &ContainerSchematic::new(DockerBuilder::new("alpine").add_script("export A=1")),
            "dockwright",
            RunOptions::default(),
            Duration::from_millis(5),
        )
    }

    #[tokio::test]
    async fn test_launches_when_absent() {
        let shell = Arc::new(RecordingShell::new());
        shell.respond("ps -a", CommandOutput::ok("{\"Names\":\"dev-old\",\"State\":\"running\"}\n"));
        let container = container(shell.clone(), DockerHost::Local);

        container.ensure_ready().await.unwrap();
        assert_eq!(container.state().await, ContainerState::Ready);

        let launch = shell
            .commands()
            .into_iter()
            .find(|c| c.starts_with("docker run"))
            .unwrap();
        assert!(launch.contains("-d --name dev dockwright/alpine sh /usr/local/bin/base64_runner.sh"));
        assert_eq!(shell.count("docker exec dev true"), 1);
    }

    #[tokio::test]
    async fn test_running_container_is_reused() {
        let shell = Arc::new(RecordingShell::new());
        shell.respond("ps -a", CommandOutput::ok("{\"Names\":\"dev\",\"State\":\"running\"}\n"));
        let container = container(shell.clone(), DockerHost::Local);

        container.run("echo hi").await.unwrap();
        assert_eq!(shell.count("docker run"), 0);
        assert_eq!(shell.count("docker start"), 0);
        assert_eq!(shell.count("docker exec dev sh /usr/local/bin/base64_runner.sh"), 1);
    }

    #[tokio::test]
    async fn test_exited_container_is_started() {
        let shell = Arc::new(RecordingShell::new());
        shell.respond("ps -a", CommandOutput::ok("{\"Names\":\"dev\",\"State\":\"exited\"}\n"));
        let container = container(shell.clone(), DockerHost::Local);

        container.ensure_ready().await.unwrap();
        assert_eq!(shell.count("docker start dev"), 1);
        assert_eq!(shell.count("docker run"), 0);
    }

    #[tokio::test]
    async fn test_polls_until_ready() {
        let shell = Arc::new(RecordingShell::new());
        shell.respond_times("exec dev true", 2, CommandOutput::failed(1, "is not running"));
        let container = container(shell.clone(), DockerHost::Local);

        container.ensure_ready().await.unwrap();
        assert_eq!(shell.count("docker exec dev true"), 3);
    }

    #[tokio::test]
    async fn test_run_failure_carries_exit_code() {
        let shell = Arc::new(RecordingShell::new());
        shell.respond("ps -a", CommandOutput::ok("{\"Names\":\"dev\",\"State\":\"running\"}\n"));
        shell.respond("base64_runner.sh", CommandOutput::failed(1, "failed"));
        let container = container(shell, DockerHost::Local);

        let err = container.run("exit 1").await.unwrap_err();
        assert_eq!(err.exit_code(), Some(1));
    }

    #[tokio::test]
    async fn test_stop_is_terminal_and_idempotent() {
        let shell = Arc::new(RecordingShell::new());
        shell.respond("ps -a", CommandOutput::ok("{\"Names\":\"dev\",\"State\":\"running\"}\n"));
        let container = container(shell.clone(), DockerHost::Local);

        container.stop().await.unwrap();
        container.stop().await.unwrap();
        assert_eq!(shell.count("docker stop dev"), 1);
        assert_eq!(container.state().await, ContainerState::Stopped);

        let err = container.run("true").await.unwrap_err();
        assert!(matches!(err, DockwrightError::ContainerStopped(ref n) if n == "dev"));
    }

    #[tokio::test]
    async fn test_upload_creates_parent_first() {
        let shell = Arc::new(RecordingShell::new());
        shell.respond("ps -a", CommandOutput::ok("{\"Names\":\"dev\",\"State\":\"running\"}\n"));
        let container = container(shell.clone(), DockerHost::Local);

        container
            .upload(Path::new("/tmp/in.txt"), Path::new("/data/out/in.txt"))
            .await
            .unwrap();

        let commands = shell.commands();
        let mkdir = commands
            .iter()
            .position(|c| c == "docker exec dev mkdir -p /data/out")
            .unwrap();
        let cp = commands
            .iter()
            .position(|c| c == "docker cp /tmp/in.txt 'dev:/data/out/in.txt'")
            .unwrap();
        assert!(mkdir < cp);
    }

    #[tokio::test]
    async fn test_sync_to_goes_through_docker_exec() {
        let shell = Arc::new(RecordingShell::new());
        shell.respond("ps -a", CommandOutput::ok("{\"Names\":\"dev\",\"State\":\"running\"}\n"));
        let container = container(shell.clone(), DockerHost::Local);

        container
            .sync_to(Path::new("/home/me/project"), Path::new("/workspace/project"))
            .await
            .unwrap();

        let rsync = shell
            .commands()
            .into_iter()
            .find(|c| c.starts_with("rsync"))
            .unwrap();
        assert!(rsync.starts_with("rsync -avH /home/me/project/ 'dev:/workspace/project/' "));
        assert!(rsync.contains("'--rsh=docker exec -i'"));
        assert!(shell.count("docker exec dev true") >= 1);
    }

    #[tokio::test]
    async fn test_sync_from_over_ssh_host() {
        let shell = Arc::new(RecordingShell::new());
        shell.respond("ps -a", CommandOutput::ok("{\"Names\":\"dev\",\"State\":\"running\"}\n"));
        let container = container(shell.clone(), DockerHost::Ssh("gpu".to_string()));

        container
            .sync_from(Path::new("/workspace/out"), Path::new("/tmp/out"))
            .await
            .unwrap();

        let rsync = shell
            .commands()
            .into_iter()
            .find(|c| c.starts_with("rsync"))
            .unwrap();
        assert!(rsync.starts_with("rsync -avH 'dev:/workspace/out/' /tmp/out/ "));
        assert!(rsync.contains("'--rsh=ssh gpu docker exec -i'"));
    }

    #[tokio::test]
    async fn test_sync_after_stop_is_rejected() {
        let shell = Arc::new(RecordingShell::new());
        let container = container(shell.clone(), DockerHost::Local);

        container.stop().await.unwrap();
        let err = container
            .sync_to(Path::new("/a"), Path::new("/b"))
            .await
            .unwrap_err();
        assert!(matches!(err, DockwrightError::ContainerStopped(_)));
        assert_eq!(shell.count("rsync"), 0);
    }

    #[tokio::test]
    async fn test_ssh_upload_stages_on_host() {
        let shell = Arc::new(RecordingShell::new());
        shell.respond("ps -a", CommandOutput::ok("{\"Names\":\"dev\",\"State\":\"running\"}\n"));
        let container = container(shell.clone(), DockerHost::Ssh("gpu".to_string()));

        container
            .upload(Path::new("/tmp/in.txt"), Path::new("/data/in.txt"))
            .await
            .unwrap();

        let commands = shell.commands();
        let scp = commands.iter().find(|c| c.starts_with("scp -r /tmp/in.txt")).unwrap();
        assert!(scp.contains("gpu:/tmp/dockwright-transfer-"));
        let cp = commands.iter().find(|c| c.starts_with("docker cp /tmp/dockwright-transfer-")).unwrap();
        assert!(cp.ends_with("'dev:/data/in.txt'"));
        assert!(commands.last().unwrap().starts_with("rm -rf /tmp/dockwright-transfer-"));
    }
}
