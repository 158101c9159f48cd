//! # Image Recipes and Build Coordination
//!
//! A [`DockerBuilder`] is an image recipe: a base image, an ordered macro
//! list and an ordered list of init scripts. Recipes are values; every
//! `add_*`/`with_*` call returns a new recipe with its own build state.
//!
//! [`ImageBuilder`] turns a recipe into a tagged image at most once per
//! recipe instance. Concurrent `build` calls on the same recipe wait on the
//! recipe's build lock; the first one builds, the rest observe the cached tag.
//!
//! ```text
//! Unbuilt --build()--> Building --engine ok--> Built (cached tag)
//!                          |
//!                          +--engine failure--> Unbuilt
//! ```

use crate::env::container::BASE_STAGE_NAME;
use crate::error::Result;
use crate::macros::runner::install_entrypoint;
use crate::macros::{Macro, MacroResolver};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Add;
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;
use tracing::{debug, info};

pub mod engine;

pub use engine::{BuildOptions, ContainerSummary, DockerEngine, DockerHost};

/// Observable build state of one recipe instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    /// Not built yet, or the last attempt failed
    Unbuilt,
    /// A build is in flight
    Building,
    /// Built; the tag is cached
    Built,
}

#[derive(Debug, Default)]
struct BuildState {
    lock: Mutex<()>,
    built: OnceLock<String>,
}

/// Macros and scripts that can be merged into a recipe as a unit.
#[derive(Debug, Clone, Default)]
pub struct DockerBuilderComponent {
    /// Build steps
    pub macros: Vec<Macro>,
    /// Init scripts
    pub scripts: Vec<String>,
}

impl DockerBuilderComponent {
    /// Empty component.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a macro.
    pub fn add_macro(mut self, item: impl Into<Macro>) -> Self {
        self.macros.push(item.into());
        self
    }

    /// Append an init script.
    pub fn add_script(mut self, script: impl Into<String>) -> Self {
        self.scripts.push(script.into());
        self
    }
}

impl Add for DockerBuilderComponent {
    type Output = DockerBuilderComponent;

    fn add(mut self, other: DockerBuilderComponent) -> Self::Output {
        self.macros.extend(other.macros);
        self.scripts.extend(other.scripts);
        self
    }
}

/// An image recipe.
#[derive(Clone)]
pub struct DockerBuilder {
    /// Image the recipe starts from
    pub base_image: String,
    /// Stage name of the `FROM` line
    pub base_stage_name: String,
    /// Build steps after the `FROM` line
    pub macros: Vec<Macro>,
    /// Init scripts, installed as the entrypoint and prepended to every run
    pub scripts: Vec<String>,
    /// Recipe name, used as build id and in generated tags
    pub name: String,
    /// Free-form annotations
    pub metadata: BTreeMap<String, String>,
    /// Target platform, `None` for the daemon default
    pub platform: Option<String>,
    state: Arc<BuildState>,
}

impl DockerBuilder {
    /// Recipe starting from `base_image`.
    ///
    /// The name defaults to the base image with `/` and `:` replaced by `_`.
    pub fn new(base_image: impl Into<String>) -> Self {
        let base_image = base_image.into();
        let name = base_image.replace(['/', ':'], "_");
        Self {
            base_image,
            base_stage_name: BASE_STAGE_NAME.to_string(),
            macros: Vec::new(),
            scripts: Vec::new(),
            name,
            metadata: BTreeMap::new(),
            platform: Some("linux/amd64".to_string()),
            state: Arc::default(),
        }
    }

    fn derive(&self, change: impl FnOnce(&mut Self)) -> Self {
        let mut next = self.clone();
        next.state = Arc::default();
        change(&mut next);
        next
    }

    /// New recipe with `item` appended.
    pub fn add_macro(&self, item: impl Into<Macro>) -> Self {
        let item = item.into();
        self.derive(|next| next.macros.push(item))
    }

    /// New recipe with an init script appended.
    pub fn add_script(&self, script: impl Into<String>) -> Self {
        let script = script.into();
        self.derive(|next| next.scripts.push(script))
    }

    /// New recipe with another name.
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.derive(|next| next.name = name)
    }

    /// New recipe with another platform.
    pub fn with_platform(&self, platform: Option<String>) -> Self {
        self.derive(|next| next.platform = platform)
    }

    /// New recipe with one more metadata entry.
    pub fn with_metadata(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let (key, value) = (key.into(), value.into());
        self.derive(|next| {
            next.metadata.insert(key, value);
        })
    }

    /// New recipe with a component's macros and scripts appended.
    pub fn merge(&self, component: &DockerBuilderComponent) -> Self {
        self.derive(|next| {
            next.macros.extend(component.macros.iter().cloned());
            next.scripts.extend(component.scripts.iter().cloned());
        })
    }

    /// Current build phase of this instance.
    pub fn phase(&self) -> BuildPhase {
        if self.state.built.get().is_some() {
            BuildPhase::Built
        } else if self.state.lock.try_lock().is_err() {
            BuildPhase::Building
        } else {
            BuildPhase::Unbuilt
        }
    }

    /// Tag of the finished build, if any.
    pub fn built_tag(&self) -> Option<&str> {
        self.state.built.get().map(String::as_str)
    }

    /// The `FROM` line.
    pub fn from_line(&self) -> String {
        format!("FROM {} AS {}", self.base_image, self.base_stage_name)
    }

    /// The complete macro list for a build: `FROM`, the recipe's macros and
    /// the entrypoint installation.
    pub fn final_macros(&self) -> Vec<Macro> {
        let mut macros = Vec::with_capacity(self.macros.len() + 2);
        macros.push(Macro::line(self.from_line()));
        macros.extend(self.macros.iter().cloned());
        macros.push(install_entrypoint(&self.scripts));
        macros
    }
}

impl Add<DockerBuilderComponent> for DockerBuilder {
    type Output = DockerBuilder;

    fn add(self, component: DockerBuilderComponent) -> Self::Output {
        self.merge(&component)
    }
}

impl fmt::Debug for DockerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DockerBuilder")
            .field("name", &self.name)
            .field("base_image", &self.base_image)
            .field("macros", &self.macros.len())
            .field("scripts", &self.scripts.len())
            .field("phase", &self.phase())
            .finish()
    }
}

/// Build coordinator: resolves recipes and runs the engine.
#[derive(Clone)]
pub struct ImageBuilder {
    resolver: MacroResolver,
    engine: DockerEngine,
    use_cache: bool,
    history: bool,
}

impl ImageBuilder {
    /// Create a coordinator.
    pub fn new(resolver: MacroResolver, engine: DockerEngine) -> Self {
        Self {
            resolver,
            engine,
            use_cache: true,
            history: false,
        }
    }

    /// Enable or disable the engine layer cache.
    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Print `docker history` after each build.
    pub fn with_history(mut self, history: bool) -> Self {
        self.history = history;
        self
    }

    /// The engine used for builds.
    pub fn engine(&self) -> &DockerEngine {
        &self.engine
    }

    /// The image definition `recipe` would build, without building it.
    pub async fn preview(&self, recipe: &DockerBuilder) -> Result<String> {
        self.resolver.preview(&recipe.final_macros()).await
    }

    /// Build `recipe` as `tag`, at most once per recipe instance.
    pub async fn build(&self, recipe: &DockerBuilder, tag: &str) -> Result<String> {
        self.build_with(recipe, tag, false).await
    }

    /// Build `recipe` as `tag` and push it.
    pub async fn build_and_push(&self, recipe: &DockerBuilder, tag: &str) -> Result<String> {
        self.build_with(recipe, tag, true).await
    }

    async fn build_with(&self, recipe: &DockerBuilder, tag: &str, push: bool) -> Result<String> {
        if let Some(built) = recipe.built_tag() {
            debug!("image for {} already built as {}", recipe.name, built);
            return Ok(built.to_string());
        }

        let _building = recipe.state.lock.lock().await;
        if let Some(built) = recipe.built_tag() {
            debug!("image for {} was built while waiting: {}", recipe.name, built);
            return Ok(built.to_string());
        }

        info!("building {} from {} as {}", recipe.name, recipe.base_image, tag);
        let options = BuildOptions {
            platform: recipe.platform.clone(),
            use_cache: self.use_cache,
            push,
            history: self.history,
            build_id: Some(recipe.name.clone()),
        };
        let engine = &self.engine;
        let built = self
            .resolver
            .with_resolved(&recipe.final_macros(), |resolved| async move {
                engine.build(&resolved.build_dir, tag, &options).await
            })
            .await?;

        let _ = recipe.state.built.set(built.clone());
        info!("built {} as {}", recipe.name, built);
        Ok(built)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildSettings;
    use crate::lock::KeyedLock;
    use crate::shell::CommandOutput;
    use crate::shell::testing::RecordingShell;
    use crate::sync::RemoteSync;
    use std::time::Duration;

    fn coordinator(shell: Arc<RecordingShell>) -> ImageBuilder {
        let sync = RemoteSync::new(shell.clone(), 3);
        let resolver = MacroResolver::new(shell.clone(), sync.clone(), BuildSettings::default())
            .with_locks(Arc::new(KeyedLock::new()));
        let engine = DockerEngine::new(DockerHost::Local, shell.clone(), shell, sync);
        ImageBuilder::new(resolver, engine)
    }

    #[test]
    fn test_default_name_and_value_semantics() {
        let base = DockerBuilder::new("nvidia/cuda:12.1-runtime");
        assert_eq!(base.name, "nvidia_cuda_12.1-runtime");

        let extended = base.add_macro("RUN true").add_script("echo ready");
        assert!(base.macros.is_empty());
        assert_eq!(extended.macros.len(), 1);
        assert_eq!(extended.scripts, vec!["echo ready"]);
        assert!(!Arc::ptr_eq(&base.state, &extended.state));
    }

    #[test]
    fn test_component_merge() {
        let component = DockerBuilderComponent::new()
            .add_macro("RUN apt-get update")
            .add_script("export A=1")
            + DockerBuilderComponent::new().add_script("export B=2");

        let recipe = DockerBuilder::new("alpine") + component;
        assert_eq!(recipe.macros.len(), 1);
        assert_eq!(recipe.scripts, vec!["export A=1", "export B=2"]);
    }

    #[tokio::test]
    async fn test_preview_starts_with_from_line() {
        let shell = Arc::new(RecordingShell::new());
        let builder = coordinator(shell);
        let recipe = DockerBuilder::new("alpine").add_script("echo hi");

        let text = builder.preview(&recipe).await.unwrap();
        assert!(text.starts_with("FROM alpine AS base\n"));
        assert!(text.contains("COPY "));
        assert!(text.contains(" /entrypoint.sh\n"));
        assert!(text.contains("RUN chmod +x /entrypoint.sh"));
    }

    #[tokio::test]
    async fn test_concurrent_builds_run_engine_once() {
        let shell = Arc::new(RecordingShell::new().with_delay(Duration::from_millis(20)));
        let builder = coordinator(shell.clone());
        let recipe = DockerBuilder::new("alpine").add_macro("RUN echo once");

        let (a, b) = tokio::join!(
            builder.build(&recipe, "test/once:1"),
            builder.build(&recipe, "test/once:1")
        );

        assert_eq!(a.unwrap(), "test/once:1");
        assert_eq!(b.unwrap(), "test/once:1");
        assert_eq!(shell.count("docker build"), 1);
        assert_eq!(recipe.phase(), BuildPhase::Built);

        builder.build(&recipe, "test/once:1").await.unwrap();
        assert_eq!(shell.count("docker build"), 1);
    }

    #[tokio::test]
    async fn test_derived_recipe_builds_again() {
        let shell = Arc::new(RecordingShell::new());
        let builder = coordinator(shell.clone());
        let recipe = DockerBuilder::new("alpine");

        builder.build(&recipe, "a").await.unwrap();
        let renamed = recipe.with_name("other");
        assert_eq!(renamed.phase(), BuildPhase::Unbuilt);
        builder.build(&renamed, "b").await.unwrap();
        assert_eq!(shell.count("docker build"), 2);
    }

    #[tokio::test]
    async fn test_failed_build_stays_unbuilt() {
        let shell = Arc::new(RecordingShell::new());
        shell.respond_times("docker build", 1, CommandOutput::failed(1, "pull denied"));
        let builder = coordinator(shell.clone());
        let recipe = DockerBuilder::new("alpine");

        let err = builder.build(&recipe, "x").await.unwrap_err();
        assert!(err.is_command_failure());
        assert_eq!(recipe.phase(), BuildPhase::Unbuilt);

        assert_eq!(builder.build(&recipe, "x").await.unwrap(), "x");
        assert_eq!(shell.count("docker build"), 2);
        assert_eq!(recipe.built_tag(), Some("x"));
    }
}
