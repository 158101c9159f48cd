//! Schematics: a recipe paired with its mount requests.
//!
//! [`ContainerSchematic`] is the full description of an environment. It can
//! be assembled in code with [`ContainerSchematic::add`], or loaded from a
//! TOML [`SchematicFile`]:
//!
//! ```toml
//! base_image = "python:3.12-slim"
//! name = "trainer"
//! scripts = ["export PYTHONUNBUFFERED=1"]
//!
//! [[steps]]
//! type = "line"
//! text = "RUN pip install numpy"
//!
//! [[steps]]
//! type = "sync"
//! src = "./src"
//! dst = "/app/src"
//! excludes = [".git", "__pycache__"]
//!
//! [[mounts]]
//! kind = "cache"
//! name = "pip"
//! mount_point = "/root/.cache/pip"
//!
//! [[mounts]]
//! kind = "resource"
//! id = "mnist"
//! mount_point = "/resources/mnist"
//!
//! [storage]
//! mnist = "/data/mnist"
//! ```

use crate::builder::DockerBuilder;
use crate::error::Result;
use crate::macros::Macro;
use crate::mounts::{MountKind, MountRequest};
use crate::storage::StaticStorageResolver;
use crate::sync::{SyncLocation, SyncRequest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Anything that can be added to a schematic.
#[derive(Debug, Clone)]
pub enum SchematicElement {
    /// A build step
    Macro(Macro),
    /// A mount request
    Mount(MountRequest),
    /// An init script
    Script(String),
    /// Several elements, added in order
    Many(Vec<SchematicElement>),
}

impl From<Macro> for SchematicElement {
    fn from(item: Macro) -> Self {
        Self::Macro(item)
    }
}

impl From<MountRequest> for SchematicElement {
    fn from(request: MountRequest) -> Self {
        Self::Mount(request)
    }
}

impl From<Vec<SchematicElement>> for SchematicElement {
    fn from(items: Vec<SchematicElement>) -> Self {
        Self::Many(items)
    }
}

/// A recipe plus the mounts its containers need.
#[derive(Debug, Clone)]
pub struct ContainerSchematic {
    /// Image recipe
    pub builder: DockerBuilder,
    /// Mounts, in declaration order
    pub mount_requests: Vec<MountRequest>,
}

impl ContainerSchematic {
    /// Schematic with no mounts.
    pub fn new(builder: DockerBuilder) -> Self {
        Self {
            builder,
            mount_requests: Vec::new(),
        }
    }

    /// New schematic with `element` added.
    pub fn add(&self, element: impl Into<SchematicElement>) -> Self {
        let mut next = self.clone();
        next.push(element.into());
        next
    }

    fn push(&mut self, element: SchematicElement) {
        match element {
            SchematicElement::Macro(item) => self.builder = self.builder.add_macro(item),
            SchematicElement::Mount(request) => self.mount_requests.push(request),
            SchematicElement::Script(script) => self.builder = self.builder.add_script(script),
            SchematicElement::Many(items) => {
                for item in items {
                    self.push(item);
                }
            }
        }
    }

    /// New schematic with the init scripts replaced by `map(scripts)`.
    pub fn map_scripts(&self, map: impl FnOnce(&[String]) -> Vec<String>) -> Self {
        let scripts = map(&self.builder.scripts);
        let mut builder = DockerBuilder::new(self.builder.base_image.clone())
            .with_name(self.builder.name.clone())
            .with_platform(self.builder.platform.clone());
        builder.base_stage_name = self.builder.base_stage_name.clone();
        builder.metadata = self.builder.metadata.clone();
        builder.macros = self.builder.macros.clone();
        builder.scripts = scripts;
        Self {
            builder,
            mount_requests: self.mount_requests.clone(),
        }
    }
}

/// One build step in a schematic file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepSpec {
    /// A literal line
    Line {
        /// Line text
        text: String,
    },
    /// A literal block
    Block {
        /// Block text
        text: String,
    },
    /// A host path copied into the image
    Copy {
        /// Host path, relative to the schematic file
        src: PathBuf,
        /// Path in the image
        dst: PathBuf,
    },
    /// A directory synced into the image
    Sync {
        /// `path` or `host:path`
        src: String,
        /// Path in the image
        dst: PathBuf,
        /// Excluded patterns
        #[serde(default)]
        excludes: Vec<String>,
        /// Extra rsync options
        #[serde(default)]
        options: Vec<String>,
        /// Hardlink unchanged files from the source
        #[serde(default)]
        hardlink: bool,
    },
}

/// One mount in a schematic file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MountSpec {
    /// Cache directory
    Cache {
        /// Cache name
        name: String,
        /// Path in the container
        mount_point: PathBuf,
    },
    /// Resource located by id
    Resource {
        /// Storage id
        id: String,
        /// Path in the container
        mount_point: PathBuf,
        /// Excluded patterns
        #[serde(default)]
        excludes: Vec<String>,
    },
    /// Source tree located by id
    Source {
        /// Storage id
        id: String,
        /// Path in the container
        mount_point: PathBuf,
        /// Excluded patterns
        #[serde(default)]
        excludes: Vec<String>,
    },
    /// Host path
    Direct {
        /// Host path, relative to the schematic file
        source: PathBuf,
        /// Path in the container
        mount_point: PathBuf,
        /// Excluded patterns
        #[serde(default)]
        excludes: Vec<String>,
    },
}

/// Declarative schematic loaded from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchematicFile {
    /// Base image
    pub base_image: String,
    /// Recipe name
    #[serde(default)]
    pub name: Option<String>,
    /// Target platform
    #[serde(default)]
    pub platform: Option<String>,
    /// Image tag to build; derived from the name when absent
    #[serde(default)]
    pub tag: Option<String>,
    /// Build steps
    #[serde(default)]
    pub steps: Vec<StepSpec>,
    /// Init scripts
    #[serde(default)]
    pub scripts: Vec<String>,
    /// Mounts
    #[serde(default)]
    pub mounts: Vec<MountSpec>,
    /// Storage ids to host paths, relative to the schematic file
    #[serde(default)]
    pub storage: BTreeMap<String, PathBuf>,
}

impl SchematicFile {
    /// Parse TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load a file, resolving relative host paths against its directory.
    pub fn load(path: &Path) -> Result<(ContainerSchematic, StaticStorageResolver, Option<String>)> {
        let file = Self::from_toml_str(&fs::read_to_string(path)?)?;
        let base_dir = path.parent().unwrap_or(Path::new("."));
        let tag = file.tag.clone();
        let (schematic, storage) = file.into_parts(base_dir);
        Ok((schematic, storage, tag))
    }

    /// Convert into a schematic and the storage table it refers to.
    pub fn into_parts(self, base_dir: &Path) -> (ContainerSchematic, StaticStorageResolver) {
        let host_path = |path: PathBuf| {
            if path.is_absolute() {
                path
            } else {
                base_dir.join(path)
            }
        };

        let mut builder = DockerBuilder::new(self.base_image);
        if let Some(name) = self.name {
            builder = builder.with_name(name);
        }
        if self.platform.is_some() {
            builder = builder.with_platform(self.platform);
        }

        let mut elements: Vec<SchematicElement> = Vec::new();
        for step in self.steps {
            let item = match step {
                StepSpec::Line { text } => Macro::Line(text),
                StepSpec::Block { text } => Macro::Block(text),
                StepSpec::Copy { src, dst } => Macro::copy(host_path(src), dst),
                StepSpec::Sync {
                    src,
                    dst,
                    excludes,
                    options,
                    hardlink,
                } => {
                    let mut src = SyncLocation::parse(&src);
                    if src.is_local() {
                        src.path = host_path(src.path);
                    }
                    let mut request = SyncRequest::new(src, SyncLocation::local(dst))
                        .with_excludes(excludes)
                        .hardlinked(hardlink);
                    request.options = options;
                    Macro::Sync(request)
                }
            };
            elements.push(item.into());
        }
        elements.extend(self.scripts.into_iter().map(SchematicElement::Script));
        for mount in self.mounts {
            let request = match mount {
                MountSpec::Cache { name, mount_point } => MountRequest::cache(name, mount_point),
                MountSpec::Resource {
                    id,
                    mount_point,
                    excludes,
                } => MountRequest::Resolve {
                    kind: MountKind::Resource,
                    id,
                    mount_point,
                    excludes,
                },
                MountSpec::Source {
                    id,
                    mount_point,
                    excludes,
                } => MountRequest::Resolve {
                    kind: MountKind::Source,
                    id,
                    mount_point,
                    excludes,
                },
                MountSpec::Direct {
                    source,
                    mount_point,
                    excludes,
                } => MountRequest::direct(host_path(source), mount_point).with_excludes(excludes),
            };
            elements.push(request.into());
        }

        let storage = self
            .storage
            .into_iter()
            .map(|(id, path)| (id, host_path(path)))
            .collect();

        (
            ContainerSchematic::new(builder).add(SchematicElement::Many(elements)),
            storage,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageResolver;

    #[test]
    fn test_add_routes_elements() {
        let schematic = ContainerSchematic::new(DockerBuilder::new("alpine"));
        let extended = schematic.add(SchematicElement::Many(vec![
            Macro::line("RUN apk add git").into(),
            MountRequest::cache("apk", "/var/cache/apk").into(),
            SchematicElement::Script("echo ready".to_string()),
        ]));

        assert!(schematic.mount_requests.is_empty());
        assert_eq!(extended.builder.macros.len(), 1);
        assert_eq!(extended.builder.scripts, vec!["echo ready"]);
        assert_eq!(extended.mount_requests.len(), 1);
    }

    #[test]
    fn test_map_scripts() {
        let schematic = ContainerSchematic::new(DockerBuilder::new("alpine").add_script("a"))
            .map_scripts(|scripts| scripts.iter().map(|s| format!("{}; b", s)).collect());
        assert_eq!(schematic.builder.scripts, vec!["a; b"]);
        assert_eq!(schematic.builder.name, "alpine");
    }

    #[tokio::test]
    async fn test_schematic_file_into_parts() {
        let file = SchematicFile::from_toml_str(
            r#"
            base_image = "python:3.12-slim"
            name = "trainer"
            tag = "ml/trainer:dev"
            scripts = ["export A=1"]

            [[steps]]
            type = "line"
            text = "RUN pip install numpy"

            [[steps]]
            type = "sync"
            src = "./src"
            dst = "/app/src"
            excludes = [".git"]

            [[steps]]
            type = "sync"
            src = "gpu:/data/shared"
            dst = "/shared"

            [[mounts]]
            kind = "cache"
            name = "pip"
            mount_point = "/root/.cache/pip"

            [[mounts]]
            kind = "source"
            id = "app"
            mount_point = "/sources/app"

            [storage]
            app = "projects/app"
            "#,
        )
        .unwrap();
        assert_eq!(file.tag.as_deref(), Some("ml/trainer:dev"));

        let (schematic, storage) = file.into_parts(Path::new("/work"));
        assert_eq!(schematic.builder.name, "trainer");
        assert_eq!(schematic.builder.macros.len(), 3);
        assert_eq!(schematic.builder.scripts, vec!["export A=1"]);
        assert_eq!(schematic.mount_requests.len(), 2);

        match &schematic.builder.macros[1] {
            Macro::Sync(request) => {
                assert_eq!(request.src, SyncLocation::local("/work/./src"));
                assert_eq!(request.excludes, vec![".git"]);
            }
            other => panic!("unexpected {:?}", other),
        }
        match &schematic.builder.macros[2] {
            Macro::Sync(request) => assert_eq!(request.src, SyncLocation::remote("gpu", "/data/shared")),
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(
            storage.locate("app").await.unwrap(),
            PathBuf::from("/work/projects/app")
        );
    }

    #[test]
    fn test_unknown_mount_kind_is_rejected() {
        let result = SchematicFile::from_toml_str(
            r#"
            base_image = "alpine"
            [[mounts]]
            kind = "teleport"
            mount_point = "/x"
            "#,
        );
        assert!(result.is_err());
    }
}
