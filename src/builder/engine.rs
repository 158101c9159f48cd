//! Docker CLI front end.
//!
//! [`DockerEngine`] composes `docker` command lines for one docker host and
//! dispatches them through the shell boundary. The host is either the local
//! daemon, a named docker context driven from the local CLI, or a machine
//! reached over ssh where the CLI itself runs remotely.

use crate::error::{DockwrightError, Result};
use crate::env::placement::REMOTE_BUILD_PREFIX;
use crate::shell::{CommandOutput, ShellCommand, ShellExecutor, quote, quote_path};
use crate::sync::{RemoteSync, SyncLocation, SyncRequest};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Where the docker daemon lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockerHost {
    /// The daemon on this machine
    Local,
    /// A named docker context, used from the local CLI
    Context(String),
    /// A machine reached over ssh; the docker CLI runs there
    Ssh(String),
}

impl DockerHost {
    /// Pick the host from optional ssh host and context settings; ssh wins.
    pub fn from_settings(host: Option<&str>, context: Option<&str>) -> Self {
        match (host, context) {
            (Some(host), _) => Self::Ssh(host.to_string()),
            (None, Some(context)) => Self::Context(context.to_string()),
            (None, None) => Self::Local,
        }
    }
}

/// Options for one `docker build`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildOptions {
    /// `--platform` value
    pub platform: Option<String>,
    /// Pass `--no-cache` when false
    pub use_cache: bool,
    /// Push the tag after building
    pub push: bool,
    /// Print `docker history` after building
    pub history: bool,
    /// Readable part of the remote build directory name; a random suffix keeps
    /// concurrent builds apart
    pub build_id: Option<String>,
}

/// One line of `docker ps -a --format '{{json .}}'`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ContainerSummary {
    /// Container id
    #[serde(rename = "ID", default)]
    pub id: String,
    /// Comma separated container names
    #[serde(rename = "Names")]
    pub names: String,
    /// Image reference
    #[serde(rename = "Image", default)]
    pub image: String,
    /// Lifecycle state such as `running` or `exited`
    #[serde(rename = "State", default)]
    pub state: String,
    /// Human readable status
    #[serde(rename = "Status", default)]
    pub status: String,
}

impl ContainerSummary {
    /// Whether one of the names equals `name` exactly.
    pub fn has_name(&self, name: &str) -> bool {
        self.names.split(',').any(|candidate| candidate.trim() == name)
    }

    /// Whether the container is running.
    pub fn is_running(&self) -> bool {
        self.state.eq_ignore_ascii_case("running")
    }
}

/// Composes and dispatches docker CLI commands for one docker host.
#[derive(Clone)]
pub struct DockerEngine {
    host: DockerHost,
    local: Arc<dyn ShellExecutor>,
    remote: Arc<dyn ShellExecutor>,
    sync: RemoteSync,
}

impl DockerEngine {
    /// Create an engine.
    ///
    /// `local` runs on this machine. `remote` runs on the docker host and is
    /// the same executor as `local` unless the host is [`DockerHost::Ssh`].
    pub fn new(
        host: DockerHost,
        local: Arc<dyn ShellExecutor>,
        remote: Arc<dyn ShellExecutor>,
        sync: RemoteSync,
    ) -> Self {
        Self {
            host,
            local,
            remote,
            sync,
        }
    }

    /// The docker host.
    pub fn host(&self) -> &DockerHost {
        &self.host
    }

    /// ssh host name when the daemon is remote.
    pub fn ssh_host(&self) -> Option<&str> {
        match &self.host {
            DockerHost::Ssh(host) => Some(host),
            _ => None,
        }
    }

    /// Executor running commands on this machine.
    pub fn local_shell(&self) -> Arc<dyn ShellExecutor> {
        Arc::clone(&self.local)
    }

    /// Executor running commands on the docker host.
    pub fn host_shell(&self) -> Arc<dyn ShellExecutor> {
        Arc::clone(&self.remote)
    }

    /// Sync endpoint for a path on the docker host.
    pub fn host_location(&self, path: impl AsRef<Path>) -> SyncLocation {
        match &self.host {
            DockerHost::Ssh(host) => SyncLocation::remote(host.clone(), path.as_ref()),
            _ => SyncLocation::local(path.as_ref()),
        }
    }

    /// The docker CLI prefix.
    pub fn docker(&self) -> String {
        match &self.host {
            DockerHost::Context(context) => format!("docker --context {}", quote(context)),
            _ => "docker".to_string(),
        }
    }

    /// Remote shell handed to rsync to reach into a container's filesystem.
    ///
    /// rsync appends the container name and its server command line.
    pub fn container_rsh(&self) -> String {
        match &self.host {
            DockerHost::Ssh(host) => format!("ssh {} docker exec -i", quote(host)),
            _ => format!("{} exec -i", self.docker()),
        }
    }

    /// Sync runner shared with the rest of the pipeline.
    pub fn sync(&self) -> &RemoteSync {
        &self.sync
    }

    async fn docker_capture(&self, args: &str) -> Result<CommandOutput> {
        self.remote
            .capture(ShellCommand::new(format!("{} {}", self.docker(), args)))
            .await
    }

    async fn docker_execute(&self, args: &str) -> Result<CommandOutput> {
        self.remote
            .execute(ShellCommand::new(format!("{} {}", self.docker(), args)))
            .await
    }

    fn build_args(options: &BuildOptions, tag: &str, context: &str) -> String {
        let mut args = vec!["build".to_string()];
        if let Some(platform) = &options.platform {
            args.push(format!("--platform {}", quote(platform)));
        }
        if !options.use_cache {
            args.push("--no-cache".to_string());
        }
        args.push(format!("-t {}", quote(tag)));
        args.push(context.to_string());
        args.join(" ")
    }

    /// Build `context_dir` into `tag`.
    pub async fn build(&self, context_dir: &Path, tag: &str, options: &BuildOptions) -> Result<String> {
        match &self.host {
            DockerHost::Ssh(host) => self.build_remote(host, context_dir, tag, options).await,
            _ => {
                info!("building image {} from {}", tag, context_dir.display());
                let args = Self::build_args(options, tag, &quote_path(context_dir));
                self.local
                    .execute(ShellCommand::new(format!("{} {}", self.docker(), args)))
                    .await?;
                self.after_build(tag, options).await?;
                Ok(tag.to_string())
            }
        }
    }

    async fn build_remote(
        &self,
        host: &str,
        context_dir: &Path,
        tag: &str,
        options: &BuildOptions,
    ) -> Result<String> {
        let unique = uuid::Uuid::new_v4().simple().to_string();
        let id = match &options.build_id {
            Some(build_id) => format!("{}-{}", build_id, &unique[..8]),
            None => unique[..8].to_string(),
        };
        let remote_dir = format!("{}{}", REMOTE_BUILD_PREFIX, id);
        info!("building image {} on {} in {}", tag, host, remote_dir);

        let outcome = async {
            let transfer = SyncRequest::new(context_dir, SyncLocation::remote(host, &remote_dir));
            self.sync.sync(&transfer).await?;
            self.docker_execute(&Self::build_args(options, tag, &quote(&remote_dir)))
                .await?;
            self.after_build(tag, options).await
        }
        .await;

        let cleanup = self
            .remote
            .execute(ShellCommand::new(format!("rm -rf {}", quote(&remote_dir))))
            .await;
        if let Err(ref e) = cleanup {
            warn!("failed to clean up remote build context {}: {}", remote_dir, e);
        }

        outcome?;
        cleanup?;
        Ok(tag.to_string())
    }

    async fn after_build(&self, tag: &str, options: &BuildOptions) -> Result<()> {
        if options.history {
            self.history(tag).await?;
        }
        if options.push {
            self.push(tag).await?;
        }
        Ok(())
    }

    /// Push a tag to its registry.
    pub async fn push(&self, tag: &str) -> Result<()> {
        info!("pushing image {}", tag);
        self.docker_execute(&format!("push {}", quote(tag))).await?;
        Ok(())
    }

    /// Print the layer history of a tag.
    pub async fn history(&self, tag: &str) -> Result<String> {
        Ok(self
            .docker_execute(&format!("history {}", quote(tag)))
            .await?
            .stdout)
    }

    /// `docker run` with preformatted arguments; returns output whatever the exit code.
    pub async fn run(&self, args: &str) -> Result<CommandOutput> {
        self.docker_capture(&format!("run {}", args)).await
    }

    /// `docker exec` into a container; returns output whatever the exit code.
    pub async fn exec(&self, container: &str, args: &str) -> Result<CommandOutput> {
        self.docker_capture(&format!("exec {} {}", quote(container), args))
            .await
    }

    /// `docker cp` between the docker host and a container.
    pub async fn cp(&self, src: &str, dst: &str) -> Result<()> {
        self.docker_execute(&format!("cp {} {}", quote(src), quote(dst)))
            .await?;
        Ok(())
    }

    /// Start an existing container.
    pub async fn start(&self, container: &str) -> Result<()> {
        self.docker_execute(&format!("start {}", quote(container)))
            .await?;
        Ok(())
    }

    /// Stop a running container, keeping it for a later `start`.
    pub async fn stop(&self, container: &str) -> Result<()> {
        self.docker_execute(&format!("stop {}", quote(container)))
            .await?;
        Ok(())
    }

    /// Stop and remove a container.
    pub async fn remove(&self, container: &str) -> Result<()> {
        self.docker_execute(&format!("rm -f {}", quote(container)))
            .await?;
        Ok(())
    }

    /// Every container known to the daemon.
    pub async fn ps_all(&self) -> Result<Vec<ContainerSummary>> {
        let output = self
            .docker_execute(&format!("ps -a --format {}", quote("{{json .}}")))
            .await?;
        parse_ps_json(&output.stdout)
    }

    /// The container named exactly `name`, if any.
    pub async fn find_container(&self, name: &str) -> Result<Option<ContainerSummary>> {
        Ok(self.ps_all().await?.into_iter().find(|c| c.has_name(name)))
    }

    /// `mkdir -p` on the docker host.
    pub async fn mkdir_p(&self, path: &Path) -> Result<()> {
        self.remote
            .execute(ShellCommand::new(format!("mkdir -p {}", quote_path(path))))
            .await?;
        Ok(())
    }
}

/// Parse newline separated JSON objects from `docker ps`.
pub fn parse_ps_json(stdout: &str) -> Result<Vec<ContainerSummary>> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).map_err(DockwrightError::from))
        .collect()
}
