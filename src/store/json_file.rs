// Cache store persisted as a single JSON document, rewritten atomically.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::traits::{CacheEntry, CacheStore};

pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl JsonFileStore {
    /// Open the store at `path`, loading existing entries if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("reading cache file {}", path.display()))?;
            if raw.trim().is_empty() {
                HashMap::new()
            } else {
                let list: Vec<CacheEntry> = serde_json::from_str(&raw)
                    .with_context(|| format!("parsing cache file {}", path.display()))?;
                list.into_iter().map(|e| (e.key.clone(), e)).collect()
            }
        } else {
            HashMap::new()
        };
        info!(
            "cache store {} opened with {} entries",
            path.display(),
            entries.len()
        );
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the whole file off the async workers. Callers hold the entries
    /// lock across this, so writes land in order.
    async fn flush(&self, entries: &HashMap<String, CacheEntry>) -> Result<()> {
        let mut list: Vec<&CacheEntry> = entries.values().collect();
        list.sort_by(|a, b| a.key.cmp(&b.key));
        let body = serde_json::to_vec_pretty(&list)?;
        let count = list.len();

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &body))
            .await
            .map_err(|e| anyhow!("cache store writer failed: {}", e))??;
        debug!("cache store flushed {} entries", count);
        Ok(())
    }
}

/// Write to a temp file in the same directory, then rename it over `path`.
fn write_atomic(path: &Path, body: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(body)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| anyhow!("replacing {}: {}", path.display(), e.error))?;
    Ok(())
}

#[async_trait]
impl CacheStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, entry: CacheEntry) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let previous = entries.insert(entry.key.clone(), entry.clone());
        if let Err(e) = self.flush(&entries).await {
            // Keep memory in step with disk.
            match previous {
                Some(old) => entries.insert(entry.key.clone(), old),
                None => entries.remove(&entry.key),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if let Some(old) = entries.remove(key) {
            if let Err(e) = self.flush(&entries).await {
                entries.insert(old.key.clone(), old);
                return Err(e);
            }
        }
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<CacheEntry>> {
        Ok(self.entries.lock().await.values().cloned().collect())
    }
}
