use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;

use crate::engine::integrity::ArtifactName;

/// The external media fetch tool.
///
/// Implementations must write their output into `work_dir` under
/// `name.stem()` (any extension) and return the produced path.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, key: &str, name: &ArtifactName, work_dir: &Path) -> Result<PathBuf>;
}
