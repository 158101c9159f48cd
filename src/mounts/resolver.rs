//! Resolution of mount requests into host bindings.

use super::{DockerMount, HostPlacement, MountRequest};
use crate::builder::DockerEngine;
use crate::error::{DockwrightError, Result};
use crate::hash::mount_hash;
use crate::scope::{Closer, Opened};
use crate::storage::StorageResolver;
use crate::sync::{RemoteSync, SyncLocation, SyncRequest};
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};

/// Where a request's data comes from and where it lands.
struct Placed {
    /// Host data to sync, with its release; `None` for directory-only mounts
    data: Option<Opened<PathBuf>>,
    host_dir: PathBuf,
    mirror: bool,
    excludes: Vec<String>,
}

/// Turns mount requests into concrete bindings on the docker host.
#[derive(Clone)]
pub struct MountResolver {
    engine: DockerEngine,
    sync: RemoteSync,
    storage: Arc<dyn StorageResolver>,
    placement: HostPlacement,
    host_permits: Arc<Semaphore>,
}

impl MountResolver {
    /// Create a resolver.
    ///
    /// `host_command_concurrency` bounds the helper commands (`mkdir -p`) run
    /// on the docker host at once.
    pub fn new(
        engine: DockerEngine,
        sync: RemoteSync,
        storage: Arc<dyn StorageResolver>,
        placement: HostPlacement,
        host_command_concurrency: usize,
    ) -> Self {
        Self {
            engine,
            sync,
            storage,
            placement,
            host_permits: Arc::new(Semaphore::new(host_command_concurrency.max(1))),
        }
    }

    /// Placement roots in use.
    pub fn placement(&self) -> &HostPlacement {
        &self.placement
    }

    /// Resolve every request concurrently; the output keeps the input order.
    ///
    /// Every request runs to completion, so scopes opened by one request are
    /// released even when a sibling fails. The first error in input order is
    /// returned.
    pub async fn resolve(&self, requests: &[MountRequest]) -> Result<Vec<DockerMount>> {
        info!("resolving {} mount requests", requests.len());
        join_all(requests.iter().map(|request| self.resolve_one(request)))
            .await
            .into_iter()
            .collect()
    }

    /// Resolve a single request.
    pub async fn resolve_one(&self, request: &MountRequest) -> Result<DockerMount> {
        let placed = self.place(request).await?;
        self.sync_and_bind(placed, request.mount_point()).await
    }

    /// Acquire the host data for `request` and choose its host directory.
    async fn place(&self, request: &MountRequest) -> Result<Placed> {
        let placed = match request {
            MountRequest::Cache { name, .. } => Placed {
                data: None,
                host_dir: self.placement.cache_root.join(name),
                mirror: false,
                excludes: Vec::new(),
            },
            MountRequest::Resolve {
                kind, id, excludes, ..
            } => {
                let source = self.storage.locate(id).await?;
                Placed {
                    data: Some(Opened::new(source, Closer::noop(id.clone()))),
                    host_dir: self.placement.root_for(*kind).join(id),
                    mirror: true,
                    excludes: excludes.clone(),
                }
            }
            MountRequest::Direct {
                source, excludes, ..
            } => Placed {
                data: Some(Opened::new(
                    source.clone(),
                    Closer::noop(source.display().to_string()),
                )),
                host_dir: self
                    .placement
                    .direct_root
                    .join(mount_hash(&source.to_string_lossy())),
                mirror: false,
                excludes: excludes.clone(),
            },
            MountRequest::Contextual {
                source,
                mount_point,
                excludes,
            } => {
                debug!("entering contextual mount source {}", source.describe());
                Placed {
                    data: Some(source.open().await?),
                    host_dir: self
                        .placement
                        .direct_root
                        .join(mount_hash(&mount_point.to_string_lossy())),
                    mirror: false,
                    excludes: excludes.clone(),
                }
            }
        };
        Ok(placed)
    }

    /// The routine shared by every request kind: create the host directory,
    /// sync the data if there is any, release it, bind.
    async fn sync_and_bind(&self, placed: Placed, mount_point: &Path) -> Result<DockerMount> {
        let Placed {
            data,
            host_dir,
            mirror,
            excludes,
        } = placed;

        let synced = async {
            self.mkdir(&host_dir).await?;
            if let Some(ref opened) = data {
                let mut request = SyncRequest::new(
                    SyncLocation::local(&opened.value),
                    self.engine.host_location(&host_dir),
                )
                .with_excludes(excludes);
                if mirror {
                    request = request.mirror();
                }
                info!("syncing mount {} -> {}", opened.value.display(), request.dst);
                self.sync.sync(&request).await?;
            }
            Ok::<_, DockwrightError>(())
        }
        .await;

        let released = match data {
            Some(opened) => opened.closer.close().await,
            None => Ok(()),
        };
        synced?;
        released?;

        Ok(DockerMount::new(host_dir, mount_point))
    }

    async fn mkdir(&self, dir: &Path) -> Result<()> {
        let _permit = self
            .host_permits
            .acquire()
            .await
            .map_err(|_| DockwrightError::config("host command semaphore closed"))?;
        self.engine.mkdir_p(dir).await
    }
}
