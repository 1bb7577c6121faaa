// Per-key lock registry with delayed garbage collection.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub type ResourceLock = Arc<Mutex<()>>;

#[derive(Default)]
pub struct LockRegistry {
    locks: DashMap<String, ResourceLock>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or lazily create the lock for `key`.
    pub fn lock_for(&self, key: &str) -> ResourceLock {
        if let Some(lock) = self.locks.get(key) {
            return Arc::clone(lock.value());
        }
        // Double-check under the shard's write lock.
        let entry = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())));
        Arc::clone(entry.value())
    }

    /// Remove the entry for `key` if nobody holds or references it.
    ///
    /// A caller that cloned the handle before removal keeps a working,
    /// if orphaned, lock; the handle count check keeps such entries alive.
    pub fn cleanup(&self, key: &str) -> bool {
        let removed = self
            .locks
            .remove_if(key, |_, lock| {
                Arc::strong_count(lock) == 1 && lock.try_lock().is_ok()
            })
            .is_some();
        if removed {
            debug!("dropped idle lock for key {}", key);
        }
        removed
    }

    /// Run [`cleanup`](Self::cleanup) for `key` after `delay`, unless `shutdown` fires first.
    pub fn schedule_cleanup(
        self: &Arc<Self>,
        key: String,
        delay: Duration,
        shutdown: CancellationToken,
    ) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    registry.cleanup(&key);
                }
                _ = shutdown.cancelled() => {}
            }
        });
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
