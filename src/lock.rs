//! Per-key mutual exclusion.
//!
//! [`KeyedLock`] hands out one exclusive async lock per string key. Locks are
//! created lazily on first use and the map entry is removed again when the last
//! holder releases it with nobody waiting, so memory stays proportional to the
//! number of keys currently in use rather than every key ever seen.
//!
//! The build pipeline keys it by a hash of the finalized image definition, so
//! two concurrent resolutions that produce byte-identical output run their
//! builds one after the other instead of side by side.

use dashmap::DashMap;
use std::sync::{Arc, LazyLock};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

static BUILD_LOCKS: LazyLock<Arc<KeyedLock>> = LazyLock::new(|| Arc::new(KeyedLock::new()));

/// A lazily populated map of per-key exclusive locks.
#[derive(Debug, Default)]
pub struct KeyedLock {
    // The shard lock of the map serializes "look up or create" against "remove if idle".
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLock {
    /// Create an empty keyed lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide instance shared by all image builds.
    pub fn global() -> Arc<KeyedLock> {
        BUILD_LOCKS.clone()
    }

    /// Wait for exclusive ownership of `key`.
    ///
    /// The lock is released when the returned guard is dropped.
    pub async fn acquire(&self, key: impl Into<String>) -> KeyedLockGuard<'_> {
        let key = key.into();
        let lock = Arc::clone(
            self.locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );

        debug!("waiting for keyed lock {}", key);
        let guard = lock.lock_owned().await;
        debug!("acquired keyed lock {}", key);

        KeyedLockGuard {
            owner: self,
            key,
            guard: Some(guard),
        }
    }

    /// Number of keys with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no key currently has a lock entry.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive ownership of one key; releases on drop.
#[derive(Debug)]
pub struct KeyedLockGuard<'a> {
    owner: &'a KeyedLock,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLockGuard<'_> {
    /// The key this guard holds.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyedLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map itself still references the lock when nobody is waiting on it.
        self.owner
            .locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
        debug!("released keyed lock {}", self.key);
    }
}
