//! Storage resolution: logical resource/source ids to host paths.

use crate::error::{DockwrightError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Maps logical ids to absolute host paths.
#[async_trait]
pub trait StorageResolver: Send + Sync {
    /// Host path for `id`; [`DockwrightError::NotFound`] listing known ids otherwise.
    async fn locate(&self, id: &str) -> Result<PathBuf>;

    /// Every id this resolver can locate.
    fn known_ids(&self) -> Vec<String>;
}

/// A fixed id to path table.
#[derive(Debug, Clone, Default)]
pub struct StaticStorageResolver {
    paths: BTreeMap<String, PathBuf>,
}

impl StaticStorageResolver {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one entry.
    pub fn with(mut self, id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.paths.insert(id.into(), path.into());
        self
    }
}

impl<I, P> FromIterator<(I, P)> for StaticStorageResolver
where
    I: Into<String>,
    P: Into<PathBuf>,
{
    fn from_iter<T: IntoIterator<Item = (I, P)>>(iter: T) -> Self {
        Self {
            paths: iter
                .into_iter()
                .map(|(id, path)| (id.into(), path.into()))
                .collect(),
        }
    }
}

#[async_trait]
impl StorageResolver for StaticStorageResolver {
    async fn locate(&self, id: &str) -> Result<PathBuf> {
        self.paths
            .get(id)
            .cloned()
            .ok_or_else(|| DockwrightError::NotFound {
                id: id.to_string(),
                known: self.known_ids(),
            })
    }

    fn known_ids(&self) -> Vec<String> {
        self.paths.keys().cloned().collect()
    }
}

/// Tries resolvers in order; the first one that knows the id wins.
#[derive(Clone, Default)]
pub struct CombinedStorageResolver {
    resolvers: Vec<Arc<dyn StorageResolver>>,
}

impl CombinedStorageResolver {
    /// Combine `resolvers`, earlier ones taking precedence.
    pub fn new(resolvers: Vec<Arc<dyn StorageResolver>>) -> Self {
        Self { resolvers }
    }

    /// Append a lower-priority resolver.
    pub fn push(mut self, resolver: Arc<dyn StorageResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }
}

#[async_trait]
impl StorageResolver for CombinedStorageResolver {
    async fn locate(&self, id: &str) -> Result<PathBuf> {
        for resolver in &self.resolvers {
            match resolver.locate(id).await {
                Ok(path) => return Ok(path),
                Err(DockwrightError::NotFound { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(DockwrightError::NotFound {
            id: id.to_string(),
            known: self.known_ids(),
        })
    }

    fn known_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.resolvers.iter().flat_map(|r| r.known_ids()).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_lookup_and_miss() {
        let resolver = StaticStorageResolver::new()
            .with("dataset", "/data/dataset")
            .with("model", "/data/model");

        assert_eq!(resolver.locate("model").await.unwrap(), PathBuf::from("/data/model"));
        match resolver.locate("nope").await {
            Err(DockwrightError::NotFound { id, known }) => {
                assert_eq!(id, "nope");
                assert_eq!(known, vec!["dataset", "model"]);
            }
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_combined_precedence_and_known_ids() {
        let first: StaticStorageResolver = [("shared", "/first/shared")].into_iter().collect();
        let second: StaticStorageResolver = [("shared", "/second/shared"), ("only", "/second/only")]
            .into_iter()
            .collect();
        let combined = CombinedStorageResolver::new(vec![Arc::new(first)]).push(Arc::new(second));

        assert_eq!(combined.locate("shared").await.unwrap(), PathBuf::from("/first/shared"));
        assert_eq!(combined.locate("only").await.unwrap(), PathBuf::from("/second/only"));
        assert_eq!(combined.known_ids(), vec!["only", "shared"]);

        let err = combined.locate("missing").await.unwrap_err();
        assert!(matches!(err, DockwrightError::NotFound { ref known, .. } if known.len() == 2));
    }
}
