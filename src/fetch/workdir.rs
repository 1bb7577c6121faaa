use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::ARTIFACT_PREFIX;

/// Make sure the working area exists and sweep leftovers older than `stale_age`.
pub async fn prepare(dir: &Path, stale_age: Duration) -> Result<usize> {
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating working area {}", dir.display()))?;
    sweep_stale(dir, stale_age).await
}

/// Delete artifact files in `dir` last modified more than `stale_age` ago.
/// Files without the artifact prefix are left alone.
pub async fn sweep_stale(dir: &Path, stale_age: Duration) -> Result<usize> {
    let cutoff = SystemTime::now()
        .checked_sub(stale_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("listing working area {}", dir.display()))?;

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(ARTIFACT_PREFIX) {
            continue;
        }
        let meta = match entry.metadata().await {
            Ok(meta) if meta.is_file() => meta,
            _ => continue,
        };
        let modified = meta.modified().unwrap_or(SystemTime::now());
        if modified <= cutoff {
            match fs::remove_file(entry.path()).await {
                Ok(()) => {
                    debug!("removed stale artifact {}", entry.path().display());
                    removed += 1;
                }
                Err(e) => warn!("cannot remove {}: {}", entry.path().display(), e),
            }
        }
    }
    if removed > 0 {
        info!("swept {} stale artifacts from {}", removed, dir.display());
    }
    Ok(removed)
}

/// Best-effort removal of a delivered artifact.
pub async fn discard(artifact: &Path) {
    if let Err(e) = fs::remove_file(artifact).await {
        debug!("could not remove {}: {}", artifact.display(), e);
    }
}
