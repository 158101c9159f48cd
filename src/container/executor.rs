//! Script execution in ephemeral containers.

use super::transport::{compose_script, interpret, run_args, runner_command, script_label};
use super::{RunOptions, default_tag};
use crate::builder::{DockerBuilder, ImageBuilder};
use crate::error::Result;
use crate::macros::runner::install_runner;
use crate::mounts::{DockerMount, MountRequest, MountResolver};
use crate::schematic::ContainerSchematic;
use crate::shell::CommandOutput;
use tracing::info;

/// Runs scripts in fresh `docker run --rm` containers of one schematic.
///
/// The image is built at most once per `DockerEnv`; mounts are resolved again
/// for every run so the container always sees current host data.
#[derive(Clone)]
pub struct DockerEnv {
    images: ImageBuilder,
    mounts: MountResolver,
    recipe: DockerBuilder,
    mount_requests: Vec<MountRequest>,
    tag: String,
    options: RunOptions,
}

impl DockerEnv {
    /// Create an environment for `schematic`.
    ///
    /// The runner script is added to the recipe; `tag` defaults to
    /// `<image_repo>/<recipe name>`.
    pub fn new(
        images: ImageBuilder,
        mounts: MountResolver,
        schematic: &ContainerSchematic,
        image_repo: &str,
        tag: Option<String>,
        options: RunOptions,
    ) -> Self {
        let recipe = schematic.builder.add_macro(install_runner());
        let tag = tag.unwrap_or_else(|| default_tag(image_repo, &recipe.name));
        Self {
            images,
            mounts,
            recipe,
            mount_requests: schematic.mount_requests.clone(),
            tag,
            options,
        }
    }

    /// Image tag this environment builds.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The recipe, including the runner installation.
    pub fn recipe(&self) -> &DockerBuilder {
        &self.recipe
    }

    /// Build the image if needed and resolve the mounts.
    pub async fn prepare(&self) -> Result<(String, Vec<DockerMount>)> {
        let image = self.images.build(&self.recipe, &self.tag).await?;
        let mounts = self.mounts.resolve(&self.mount_requests).await?;
        Ok((image, mounts))
    }

    /// The image definition this environment builds.
    pub async fn preview(&self) -> Result<String> {
        self.images.preview(&self.recipe).await
    }

    /// Run `script` after the recipe's init scripts.
    pub async fn run_script(&self, script: &str) -> Result<CommandOutput> {
        self.run_full(compose_script(&self.recipe.scripts, script), script)
            .await
    }

    /// Run `script` without the init scripts.
    pub async fn run_script_without_init(&self, script: &str) -> Result<CommandOutput> {
        self.run_full(compose_script(&[], script), script).await
    }

    async fn run_full(&self, full_script: String, script: &str) -> Result<CommandOutput> {
        let (image, mounts) = self.prepare().await?;
        let label = script_label(script);
        info!("running `{}` in {}", label, image);

        let args = run_args(
            &self.options,
            &mounts,
            &["--rm".to_string()],
            &image,
            &runner_command(&full_script),
        );
        let output = self.images.engine().run(&args).await?;
        info!("`{}` exited with {}", label, output.exit_code);
        interpret(output, &label)
    }
}
