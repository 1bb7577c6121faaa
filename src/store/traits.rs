use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A delivered artifact that can be re-sent by token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub token: String,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            token: token.into(),
            created_at: Utc::now(),
        }
    }
}

/// System of record for cache entries.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;
    /// Insert or replace the entry for `entry.key`.
    async fn set(&self, entry: CacheEntry) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn entries(&self) -> Result<Vec<CacheEntry>>;
}
