//! # Build Macros
//!
//! A [`Macro`] is one unit of build-step intent. A builder holds an ordered
//! list of them; [`MacroResolver`] compiles that list into a staged build
//! context directory plus the final image-definition text.
//!
//! ## Variants
//!
//! - **Line / Block**: literal image-definition text, emitted verbatim
//! - **Copy**: a host file or directory staged into the context and copied to
//!   a container path
//! - **Sync**: like `Copy`, but staged with rsync so excludes and hardlink
//!   reuse apply
//! - **Scoped**: a [`ScopedResource`] that yields a macro while it is open
//! - **Deferred**: a step computed from the live [`BuildContext`], typically
//!   one that writes a generated file into the staging directory
//! - **Seq**: an ordered list, flattened in place
//!
//! ## Example
//!
//! ```rust
//! use dockwright::macros::Macro;
//!
//! let setup = Macro::seq([
//!     Macro::line("RUN apt-get update"),
//!     Macro::copy("./requirements.txt", "/app/requirements.txt"),
//!     Macro::block("RUN pip install -r /app/requirements.txt \\\n    && rm -rf /root/.cache"),
//! ]);
//! assert_eq!(setup.len(), 3);
//! ```

use crate::error::Result;
use crate::hash::staging_name;
use crate::scope::ScopedResource;
use crate::sync::SyncRequest;
use async_trait::async_trait;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod resolver;
pub mod runner;

pub use resolver::{MacroResolver, ResolvedContext};

/// Directory inside the staging area that holds generated files.
pub const GENERATED_DIR: &str = ".generated";

/// One unit of build-step intent.
#[derive(Clone)]
pub enum Macro {
    /// A single literal line
    Line(String),
    /// A multi-line literal block
    Block(String),
    /// Stage a host path and copy it to `dst` in the image
    Copy {
        /// Host file or directory
        src: PathBuf,
        /// Destination inside the image
        dst: PathBuf,
    },
    /// Stage a directory with rsync; `dst.path` is the path inside the image
    Sync(SyncRequest),
    /// A resource entered once per resolution that yields a macro
    Scoped(Arc<dyn ScopedResource<Macro>>),
    /// A step computed from the build context
    Deferred(Arc<dyn DeferredMacro>),
    /// Ordered list of macros
    Seq(Vec<Macro>),
}

impl Macro {
    /// A literal line.
    pub fn line(text: impl Into<String>) -> Self {
        Self::Line(text.into())
    }

    /// A literal block.
    pub fn block(text: impl Into<String>) -> Self {
        Self::Block(text.into())
    }

    /// Copy a host path into the image.
    pub fn copy(src: impl Into<PathBuf>, dst: impl Into<PathBuf>) -> Self {
        Self::Copy {
            src: src.into(),
            dst: dst.into(),
        }
    }

    /// Sync a directory into the image.
    pub fn sync(request: SyncRequest) -> Self {
        Self::Sync(request)
    }

    /// Wrap a scoped resource.
    pub fn scoped(resource: Arc<dyn ScopedResource<Macro>>) -> Self {
        Self::Scoped(resource)
    }

    /// A step computed from the build context by a closure.
    pub fn deferred<F>(label: impl Into<String>, produce: F) -> Self
    where
        F: Fn(&BuildContext) -> Result<Macro> + Send + Sync + 'static,
    {
        Self::Deferred(Arc::new(FnDeferred {
            label: label.into(),
            produce,
        }))
    }

    /// An ordered list.
    pub fn seq(macros: impl IntoIterator<Item = Macro>) -> Self {
        Self::Seq(macros.into_iter().collect())
    }

    /// Write `contents` into the staging area at build time and copy it to `dst`.
    ///
    /// With `executable` set, a `RUN chmod +x` line follows the copy.
    pub fn inline_file(dst: impl Into<PathBuf>, contents: impl Into<String>, executable: bool) -> Self {
        let dst = dst.into();
        let contents = contents.into();
        let label = format!("inline file {}", dst.display());
        Self::deferred(label, move |ctx| {
            let src = ctx.write_generated(&dst, &contents)?;
            let mut steps = vec![Macro::copy(src, dst.clone())];
            if executable {
                steps.push(Macro::line(format!("RUN chmod +x {}", dst.display())));
            }
            Ok(Macro::Seq(steps))
        })
    }

    /// Number of direct children for a sequence, 1 otherwise.
    pub fn len(&self) -> usize {
        match self {
            Self::Seq(items) => items.len(),
            _ => 1,
        }
    }

    /// Whether this is an empty sequence.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Seq(items) if items.is_empty())
    }
}

impl fmt::Debug for Macro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Line(line) => f.debug_tuple("Line").field(line).finish(),
            Self::Block(block) => f.debug_tuple("Block").field(block).finish(),
            Self::Copy { src, dst } => f
                .debug_struct("Copy")
                .field("src", src)
                .field("dst", dst)
                .finish(),
            Self::Sync(request) => f.debug_tuple("Sync").field(request).finish(),
            Self::Scoped(resource) => f.debug_tuple("Scoped").field(&resource.describe()).finish(),
            Self::Deferred(step) => f.debug_tuple("Deferred").field(&step.describe()).finish(),
            Self::Seq(items) => f.debug_list().entries(items).finish(),
        }
    }
}

impl From<&str> for Macro {
    fn from(line: &str) -> Self {
        Self::Line(line.to_string())
    }
}

impl From<String> for Macro {
    fn from(line: String) -> Self {
        Self::Line(line)
    }
}

impl From<SyncRequest> for Macro {
    fn from(request: SyncRequest) -> Self {
        Self::Sync(request)
    }
}

impl From<Vec<Macro>> for Macro {
    fn from(items: Vec<Macro>) -> Self {
        Self::Seq(items)
    }
}

/// State visible to deferred macros during one resolution.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Staging directory that becomes the docker build context
    pub build_dir: PathBuf,
    lines: Vec<String>,
}

impl BuildContext {
    pub(crate) fn new(build_dir: PathBuf) -> Self {
        Self {
            build_dir,
            lines: Vec::new(),
        }
    }

    /// Image-definition text emitted so far.
    pub fn text(&self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }

    pub(crate) fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// Write a generated file for `dst` into the staging area.
    ///
    /// Returns the host path of the written file.
    pub fn write_generated(&self, dst: &Path, contents: &str) -> Result<PathBuf> {
        let dir = self.build_dir.join(GENERATED_DIR);
        fs::create_dir_all(&dir)?;
        let path = dir.join(staging_name(dst));
        fs::write(&path, contents)?;
        Ok(path)
    }
}

/// A build step computed while resolving.
#[async_trait]
pub trait DeferredMacro: Send + Sync {
    /// Human readable name for logs.
    fn describe(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }

    /// Produce the macro to resolve in place of this one.
    async fn produce(&self, ctx: &BuildContext) -> Result<Macro>;
}

struct FnDeferred<F> {
    label: String,
    produce: F,
}

#[async_trait]
impl<F> DeferredMacro for FnDeferred<F>
where
    F: Fn(&BuildContext) -> Result<Macro> + Send + Sync,
{
    fn describe(&self) -> String {
        self.label.clone()
    }

    async fn produce(&self, ctx: &BuildContext) -> Result<Macro> {
        (self.produce)(ctx)
    }
}
