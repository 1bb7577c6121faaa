// Result cache: resource key -> delivery token, mirrored in memory over a persistent store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::store::traits::{CacheEntry, CacheStore};

pub struct ResultCache {
    mirror: DashMap<String, CacheEntry>,
    store: Arc<dyn CacheStore>,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            mirror: DashMap::new(),
            store,
        }
    }

    /// Warm the in-memory mirror from the store.
    pub async fn load(&self) -> PipelineResult<usize> {
        let entries = self.store.entries().await.map_err(store_error)?;
        let count = entries.len();
        for entry in entries {
            self.mirror.insert(entry.key.clone(), entry);
        }
        info!("result cache warmed with {} entries", count);
        Ok(count)
    }

    /// Look up the delivery token for `key`. Store errors count as a miss.
    pub async fn get(&self, key: &str) -> Option<String> {
        if let Some(entry) = self.mirror.get(key) {
            return Some(entry.token.clone());
        }
        match self.store.get(key).await {
            Ok(Some(entry)) => {
                let token = entry.token.clone();
                self.mirror.insert(key.to_string(), entry);
                Some(token)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("cache lookup for {} failed: {:#}", key, e);
                None
            }
        }
    }

    pub async fn set(&self, key: &str, token: &str) -> PipelineResult<()> {
        let entry = CacheEntry::new(key, token);
        self.store.set(entry.clone()).await.map_err(store_error)?;
        self.mirror.insert(key.to_string(), entry);
        debug!("cached token for {}", key);
        Ok(())
    }

    /// Drop the entry for `key`. The mirror is cleared even if the store fails.
    pub async fn invalidate(&self, key: &str) -> PipelineResult<()> {
        self.mirror.remove(key);
        self.store.delete(key).await.map_err(store_error)?;
        debug!("invalidated cache entry for {}", key);
        Ok(())
    }

    /// Drop the entry for `key` only while it still holds `token`. Returns
    /// whether anything was removed.
    pub async fn invalidate_if(&self, key: &str, token: &str) -> PipelineResult<bool> {
        self.mirror.remove_if(key, |_, entry| entry.token == token);
        match self.store.get(key).await.map_err(store_error)? {
            Some(entry) if entry.token == token => {
                self.store.delete(key).await.map_err(store_error)?;
                debug!("invalidated stale token for {}", key);
                Ok(true)
            }
            Some(_) => {
                debug!("kept newer token for {}", key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Number of cached keys, as recorded by the store.
    pub async fn len(&self) -> usize {
        match self.store.entries().await {
            Ok(entries) => entries.len(),
            Err(e) => {
                warn!("cache size from store failed, using mirror: {:#}", e);
                self.mirror.len()
            }
        }
    }

    /// Remove every entry created more than `max_age` ago. Returns how many were removed.
    pub async fn purge_older_than(&self, max_age: Duration) -> PipelineResult<usize> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| PipelineError::Store(format!("invalid age: {}", e)))?;
        let cutoff = Utc::now() - max_age;
        let entries = self.store.entries().await.map_err(store_error)?;

        let mut removed = 0;
        for entry in entries.into_iter().filter(|e| e.created_at < cutoff) {
            self.invalidate(&entry.key).await?;
            removed += 1;
        }
        info!("purged {} cache entries older than {}", removed, cutoff);
        Ok(removed)
    }

    pub async fn clear(&self) -> PipelineResult<usize> {
        let entries = self.store.entries().await.map_err(store_error)?;
        let count = entries.len();
        for entry in entries {
            self.invalidate(&entry.key).await?;
        }
        self.mirror.clear();
        info!("cleared {} cache entries", count);
        Ok(count)
    }
}

fn store_error(e: anyhow::Error) -> PipelineError {
    PipelineError::Store(format!("{:#}", e))
}
