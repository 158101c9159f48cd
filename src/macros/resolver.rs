//! Macro resolution: compile a macro list into a staged build context.
//!
//! The walk is depth-first and left to right. Text is appended in source
//! order; copy and sync steps are started as background tasks and only their
//! `COPY` line is emitted immediately. Every background task is joined before
//! the context is finalized, and every scoped resource opened during the walk
//! is closed afterwards, whether resolution succeeded or not.

use super::{BuildContext, Macro};
use crate::config::{BuildSettings, OversizedContextPolicy};
use crate::env::container::DOCKERFILE_NAME;
use crate::error::{DockwrightError, Result};
use crate::hash::{context_hash, sha256_hex, staging_name};
use crate::lock::KeyedLock;
use crate::scope::ActiveScopes;
use crate::shell::{ShellCommand, ShellExecutor, quote_path};
use crate::sync::{RemoteSync, SyncLocation};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const MB: u64 = 1024 * 1024;

/// A finalized build context, valid for the duration of the caller's closure.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedContext {
    /// Staging directory containing the Dockerfile and staged files
    pub build_dir: PathBuf,
    /// Final image-definition text
    pub dockerfile: String,
    /// Order-independent hash of every staged file
    pub content_hash: String,
}

/// Compiles macro lists into build contexts.
#[derive(Clone)]
pub struct MacroResolver {
    shell: Arc<dyn ShellExecutor>,
    sync: RemoteSync,
    locks: Arc<KeyedLock>,
    settings: BuildSettings,
}

/// Mutable state of one resolution.
struct Resolution {
    ctx: BuildContext,
    scopes: ActiveScopes,
    tasks: JoinSet<Result<()>>,
    /// staging name -> source that was staged there
    staged: HashMap<String, String>,
}

impl MacroResolver {
    /// Create a resolver. `shell` must run on the machine holding the staging directory.
    pub fn new(shell: Arc<dyn ShellExecutor>, sync: RemoteSync, settings: BuildSettings) -> Self {
        Self {
            shell,
            sync,
            locks: KeyedLock::global(),
            settings,
        }
    }

    /// Use a private keyed lock instead of the process-wide one.
    pub fn with_locks(mut self, locks: Arc<KeyedLock>) -> Self {
        self.locks = locks;
        self
    }

    /// Resolve `macros` and run `use_context` on the finalized context.
    ///
    /// The staging directory exists only while `use_context` runs. Resolutions
    /// producing byte-identical image definitions run `use_context` one at a time.
    pub async fn with_resolved<F, Fut, T>(&self, macros: &[Macro], use_context: F) -> Result<T>
    where
        F: FnOnce(ResolvedContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let staging = tempfile::Builder::new().prefix("dockwright-build-").tempdir()?;
        info!("resolving {} macros into {}", macros.len(), staging.path().display());

        let mut resolution = Resolution {
            ctx: BuildContext::new(staging.path().to_path_buf()),
            scopes: ActiveScopes::new(),
            tasks: JoinSet::new(),
            staged: HashMap::new(),
        };

        let mut outcome = self.walk_all(macros, &mut resolution).await;
        let joined = join_all(&mut resolution.tasks).await;
        if outcome.is_ok() {
            outcome = joined;
        }

        let result = match outcome {
            Ok(()) => self.finalize(&resolution.ctx, use_context).await,
            Err(e) => Err(e),
        };

        let closed = resolution.scopes.close_all().await;
        let value = result?;
        closed?;
        Ok(value)
    }

    /// Resolve `macros` and return the image-definition text.
    pub async fn preview(&self, macros: &[Macro]) -> Result<String> {
        self.with_resolved(macros, |resolved| async move { Ok(resolved.dockerfile) })
            .await
    }

    async fn walk_all(&self, macros: &[Macro], resolution: &mut Resolution) -> Result<()> {
        for item in macros {
            self.walk(item, resolution).await?;
        }
        Ok(())
    }

    fn walk<'a>(&'a self, item: &'a Macro, resolution: &'a mut Resolution) -> BoxFuture<'a, Result<()>> {
        async move {
            match item {
                Macro::Line(line) => resolution.ctx.push(line.clone()),
                Macro::Block(block) => resolution.ctx.push(block.clone()),
                Macro::Copy { src, dst } => {
                    let name = staging_name(dst);
                    if self.claim(resolution, &name, &src.to_string_lossy())? {
                        let target = resolution.ctx.build_dir.join(&name);
                        let line = format!("cp -r {} {}", quote_path(src), quote_path(&target));
                        let shell = Arc::clone(&self.shell);
                        debug!("staging copy {} -> {}", src.display(), name);
                        resolution.tasks.spawn(async move {
                            shell.execute(ShellCommand::new(line)).await.map(|_| ())
                        });
                    }
                    resolution.ctx.push(format!("COPY {} {}", name, dst.display()));
                }
                Macro::Sync(request) => {
                    let name = staging_name(&request.dst.path);
                    if self.claim(resolution, &name, &request.src.to_rsync_arg())? {
                        let staged = request
                            .retarget(SyncLocation::local(resolution.ctx.build_dir.join(&name)));
                        staged.validate()?;
                        let sync = self.sync.clone();
                        debug!("staging sync {} -> {}", request.src, name);
                        resolution
                            .tasks
                            .spawn(async move { sync.sync(&staged).await });
                    }
                    resolution
                        .ctx
                        .push(format!("COPY {} {}", name, request.dst.path.display()));
                }
                Macro::Scoped(resource) => {
                    let produced = resolution.scopes.enter(resource).await?;
                    self.walk(&produced, resolution).await?;
                }
                Macro::Deferred(step) => {
                    debug!("running deferred macro {}", step.describe());
                    let produced = step.produce(&resolution.ctx).await?;
                    self.walk(&produced, resolution).await?;
                }
                Macro::Seq(items) => {
                    for child in items {
                        self.walk(child, resolution).await?;
                    }
                }
            }
            Ok(())
        }
        .boxed()
    }

    /// Record that `source` is staged under `name`.
    ///
    /// Returns false when the same source already claimed the name, and fails
    /// when a different source did.
    fn claim(&self, resolution: &mut Resolution, name: &str, source: &str) -> Result<bool> {
        match resolution.staged.get(name) {
            Some(existing) if existing == source => Ok(false),
            Some(existing) => Err(DockwrightError::config(format!(
                "staging slot {} is used by both {} and {}",
                name, existing, source
            ))),
            None => {
                resolution.staged.insert(name.to_string(), source.to_string());
                Ok(true)
            }
        }
    }

    async fn finalize<F, Fut, T>(&self, ctx: &BuildContext, use_context: F) -> Result<T>
    where
        F: FnOnce(ResolvedContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let dockerfile = ctx.text();
        fs::write(ctx.build_dir.join(DOCKERFILE_NAME), &dockerfile)?;
        info!("generated Dockerfile:\n{}", dockerfile);

        self.check_size(&ctx.build_dir)?;
        let content_hash = context_hash(&ctx.build_dir)?;
        info!("build context hash: {}", content_hash);

        let _guard = self.locks.acquire(sha256_hex(&dockerfile)).await;
        use_context(ResolvedContext {
            build_dir: ctx.build_dir.clone(),
            dockerfile,
            content_hash,
        })
        .await
    }

    fn check_size(&self, dir: &Path) -> Result<()> {
        let threshold = self.settings.large_file_threshold_mb * MB;
        let mut total = 0u64;
        let mut large = Vec::new();
        for entry in WalkDir::new(dir) {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let size = entry.metadata().map_err(std::io::Error::from)?.len();
            total += size;
            if size >= threshold {
                large.push((entry.path().to_path_buf(), size));
            }
        }

        large.sort_by(|a, b| b.1.cmp(&a.1));
        for (path, size) in &large {
            warn!("large file in build context: {} ({})", path.display(), format_size(*size));
        }

        let size_mb = total as f64 / MB as f64;
        debug!("build context size: {}", format_size(total));
        if size_mb > self.settings.context_size_limit_mb as f64 {
            match self.settings.oversized_context {
                OversizedContextPolicy::Warn => warn!(
                    "build context at {} is {:.1} MB, above the {} MB limit",
                    dir.display(),
                    size_mb,
                    self.settings.context_size_limit_mb
                ),
                OversizedContextPolicy::Error => {
                    return Err(DockwrightError::ContextTooLarge {
                        dir: dir.to_path_buf(),
                        size_mb,
                        limit_mb: self.settings.context_size_limit_mb,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Wait for every background task, returning the first failure.
async fn join_all(tasks: &mut JoinSet<Result<()>>) -> Result<()> {
    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        let outcome = joined.map_err(DockwrightError::from).and_then(|r| r);
        if let Err(e) = outcome {
            warn!("staging task failed: {}", e);
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Human readable byte count.
pub fn format_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if value < 1024.0 {
            return format!("{:.2} {}", value, unit);
        }
        value /= 1024.0;
    }
    format!("{:.2} TB", value)
}
