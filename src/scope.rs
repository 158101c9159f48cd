//! Scoped resources: an explicit `open() -> (value, closer)` capability.
//!
//! Macros and contextual mounts may need something that only exists for the
//! duration of a build or a sync, such as a patched temporary copy of a
//! project. A [`ScopedResource`] produces the value together with a [`Closer`]
//! that releases it. Opened scopes are tracked in [`ActiveScopes`] and closed
//! in reverse order on every exit path.

use crate::error::{DockwrightError, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Future returned by a closer.
pub type CloseFuture = BoxFuture<'static, Result<()>>;

/// Releases whatever a [`ScopedResource`] opened.
pub struct Closer {
    label: String,
    close: Option<Box<dyn FnOnce() -> CloseFuture + Send>>,
}

impl Closer {
    /// Closer that runs `close` when invoked.
    pub fn new<F>(label: impl Into<String>, close: F) -> Self
    where
        F: FnOnce() -> CloseFuture + Send + 'static,
    {
        Self {
            label: label.into(),
            close: Some(Box::new(close)),
        }
    }

    /// Closer with nothing to release.
    pub fn noop(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            close: None,
        }
    }

    /// Label used in logs.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Release the resource.
    pub async fn close(mut self) -> Result<()> {
        match self.close.take() {
            Some(close) => close().await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Closer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closer").field("label", &self.label).finish()
    }
}

/// A value handed out by [`ScopedResource::open`] plus the means to release it.
#[derive(Debug)]
pub struct Opened<T> {
    /// The produced value
    pub value: T,
    /// Releases the value; must be called exactly once
    pub closer: Closer,
}

impl<T> Opened<T> {
    /// Pair a value with its closer.
    pub fn new(value: T, closer: Closer) -> Self {
        Self { value, closer }
    }
}

/// Something that yields a value for a bounded scope.
#[async_trait]
pub trait ScopedResource<T>: Send + Sync {
    /// Human readable name for logs and errors.
    fn describe(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }

    /// Enter the scope.
    async fn open(&self) -> Result<Opened<T>>;
}

/// Identity of a shared resource, stable for the lifetime of the allocation.
pub fn identity<T: ?Sized>(resource: &Arc<T>) -> usize {
    Arc::as_ptr(resource) as *const () as usize
}

/// Scopes opened during one operation, closed in reverse order.
#[derive(Debug, Default)]
pub struct ActiveScopes {
    entries: Vec<(usize, Closer)>,
}

impl ActiveScopes {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a resource with this identity is currently open.
    pub fn contains(&self, id: usize) -> bool {
        self.entries.iter().any(|(open_id, _)| *open_id == id)
    }

    /// Open `resource` unless it is already open.
    ///
    /// Entering the same resource twice is a [`DockwrightError::Reentrancy`].
    pub async fn enter<T>(&mut self, resource: &Arc<dyn ScopedResource<T>>) -> Result<T> {
        let id = identity(resource);
        if self.contains(id) {
            return Err(DockwrightError::Reentrancy(resource.describe()));
        }
        debug!("entering scoped resource {}", resource.describe());
        let opened = resource.open().await?;
        self.entries.push((id, opened.closer));
        Ok(opened.value)
    }

    /// Number of open scopes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is open.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Close everything in reverse order of opening.
    ///
    /// Every closer runs even if an earlier one fails; the first failure is returned.
    pub async fn close_all(self) -> Result<()> {
        let mut first_error = None;
        for (_, closer) in self.entries.into_iter().rev() {
            let label = closer.label().to_string();
            debug!("closing scoped resource {}", label);
            if let Err(e) = closer.close().await {
                warn!("failed to close scoped resource {}: {}", label, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
