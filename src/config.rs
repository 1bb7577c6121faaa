use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// File-name prefix for every artifact written into the shared working area.
pub const ARTIFACT_PREFIX: &str = "media_user";

/// Number of hex digits of the key digest encoded in artifact names.
pub const KEY_HASH_LEN: usize = 8;

/// Extensions the fetch tool may fall back to when the container changes.
pub const ARTIFACT_EXTENSIONS: [&str; 5] = ["mp4", "mkv", "webm", "avi", "mov"];

/// Top-level configuration for the fetch engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of fetches running at once across all keys.
    pub max_workers: usize,
    /// How long a late request waits on an in-flight fetch for the same key.
    pub join_timeout_secs: u64,
    /// Total delivery attempts before a transient failure becomes terminal.
    pub delivery_max_retries: u32,
    /// Fixed pause between delivery attempts.
    pub delivery_backoff_ms: u64,
    /// Delay before an idle per-key lock is dropped from the registry.
    pub lock_cleanup_delay_ms: u64,
    /// Bounded wait for a free slot. `None` rejects immediately as busy.
    pub slot_wait_ms: Option<u64>,
    /// Shared working area the fetch tool writes into.
    pub work_dir: PathBuf,
    /// Leftover artifacts older than this are swept from the working area.
    pub stale_artifact_age_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: 3,
            join_timeout_secs: 300,
            delivery_max_retries: 10,
            delivery_backoff_ms: 2_000,
            lock_cleanup_delay_ms: 30_000,
            slot_wait_ms: None,
            work_dir: PathBuf::from("./tmp"),
            stale_artifact_age_secs: 3_600,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `MAX_DOWNLOAD_WORKERS`, `DOWNLOAD_TIMEOUT_SECS`
    /// and `FETCH_WORK_DIR`. Unparseable or non-positive values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(workers) = env_number("MAX_DOWNLOAD_WORKERS") {
            if workers > 0 {
                config.max_workers = workers as usize;
            }
        }
        if let Some(secs) = env_number("DOWNLOAD_TIMEOUT_SECS") {
            if secs > 0 {
                config.join_timeout_secs = secs;
            }
        }
        if let Ok(dir) = std::env::var("FETCH_WORK_DIR") {
            if !dir.trim().is_empty() {
                config.work_dir = PathBuf::from(dir);
            }
        }
        config
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }

    pub fn delivery_backoff(&self) -> Duration {
        Duration::from_millis(self.delivery_backoff_ms)
    }

    pub fn lock_cleanup_delay(&self) -> Duration {
        Duration::from_millis(self.lock_cleanup_delay_ms)
    }

    pub fn slot_wait(&self) -> Option<Duration> {
        self.slot_wait_ms.map(Duration::from_millis)
    }

    pub fn stale_artifact_age(&self) -> Duration {
        Duration::from_secs(self.stale_artifact_age_secs)
    }
}

fn env_number(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.delivery_max_retries, 10);
        assert_eq!(config.delivery_backoff(), Duration::from_secs(2));
        assert_eq!(config.lock_cleanup_delay(), Duration::from_secs(30));
        assert_eq!(config.join_timeout(), Duration::from_secs(300));
        assert!(config.slot_wait().is_none());
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"max_workers": 8, "slot_wait_ms": 250}"#).unwrap();
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.slot_wait(), Some(Duration::from_millis(250)));
        assert_eq!(config.delivery_max_retries, 10);
    }
}
